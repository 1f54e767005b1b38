mod common;

use common::*;
use sorng_sftp_pool::sftp_pool::filters;
use sorng_sftp_pool::sftp_pool::*;

fn small_tree() -> MemoryFs {
    MemoryFs::new()
        .with_dir(
            "/root",
            vec![DirEntry::directory("x"), DirEntry::file("y.txt", 10)],
        )
        .with_dir("/root/x", vec![DirEntry::file("z.txt", 20)])
}

fn deep_tree() -> MemoryFs {
    MemoryFs::new()
        .with_dir(
            "/srv",
            vec![
                DirEntry::directory("a"),
                DirEntry::directory(".git"),
                DirEntry::file("r.txt", 1),
                DirEntry::file("r.log", 1),
                DirEntry::symlink("loop"),
            ],
        )
        .with_dir(
            "/srv/a",
            vec![DirEntry::directory("b"), DirEntry::file("a.txt", 1)],
        )
        .with_dir("/srv/a/b", vec![DirEntry::file("b.txt", 1)])
        .with_dir("/srv/.git", vec![DirEntry::file("HEAD", 1)])
        // Reachable only through the symlink.
        .with_dir("/srv/loop", vec![DirEntry::file("never.txt", 1)])
        .with_batch_size(2)
}

#[tokio::test]
async fn test_traverse_collects_files_at_every_level() {
    let (client, connector) = client(small_tree(), config(2));
    let seen = Seen::default();
    client.traverse_folder("/root", seen.traversal());
    client.start().unwrap();
    settle(&client).await;

    assert_eq!(seen.sorted(), vec!["/root/x/z.txt", "/root/y.txt"]);
    let mut opened = connector.stats().dirs_opened;
    opened.sort();
    assert_eq!(opened, vec!["/root", "/root/x"]);
}

#[tokio::test]
async fn test_concurrent_traversals_keep_their_own_collectors() {
    let fs = MemoryFs::new()
        .with_dir(
            "/p",
            vec![DirEntry::directory("a"), DirEntry::file("p.txt", 1)],
        )
        .with_dir("/p/a", vec![DirEntry::file("pa.txt", 1)])
        .with_dir(
            "/q",
            vec![DirEntry::directory("b"), DirEntry::file("q.txt", 1)],
        )
        .with_dir("/q/b", vec![DirEntry::file("qb.txt", 1)]);
    let (client, connector) = client(fs, config(1));
    let (p, q) = (Seen::default(), Seen::default());
    client.traverse_folder("/p", p.traversal());
    client.traverse_folder("/q", q.traversal());
    client.start().unwrap();
    settle(&client).await;

    assert_eq!(p.sorted(), vec!["/p/a/pa.txt", "/p/p.txt"]);
    assert_eq!(q.sorted(), vec!["/q/b/qb.txt", "/q/q.txt"]);
    assert_eq!(connector.stats().dirs_opened.len(), 4);
}

#[tokio::test]
async fn test_traverse_collects_directories_when_asked() {
    let (client, _connector) = client(small_tree(), config(1));
    let seen = Seen::default();
    client.traverse_folder("/root", seen.traversal().collect_directories(true));
    client.start().unwrap();
    settle(&client).await;

    assert_eq!(
        seen.sorted(),
        vec!["/root/x", "/root/x/z.txt", "/root/y.txt"]
    );
}

#[tokio::test]
async fn test_reject_all_filters_open_only_the_root() {
    let (client, connector) = client(small_tree(), config(2));
    let seen = Seen::default();
    client.traverse_folder(
        "/root",
        seen.traversal()
            .with_traverse_filter(|_parent: &str, _entry: &DirEntry| false)
            .with_collect_filter(|_parent: &str, _entry: &DirEntry| false)
            .collect_directories(true),
    );
    client.start().unwrap();
    settle(&client).await;

    assert!(seen.take().is_empty());
    assert_eq!(connector.stats().dirs_opened, vec!["/root"]);
}

#[tokio::test]
async fn test_directory_collected_without_descending() {
    let (client, connector) = client(small_tree(), config(2));
    let seen = Seen::default();
    client.traverse_folder(
        "/root",
        seen.traversal()
            .with_traverse_filter(|_parent: &str, _entry: &DirEntry| false)
            .collect_directories(true),
    );
    client.start().unwrap();
    settle(&client).await;

    assert_eq!(seen.sorted(), vec!["/root/x", "/root/y.txt"]);
    assert_eq!(connector.stats().dirs_opened, vec!["/root"]);
}

#[tokio::test]
async fn test_symlinks_are_neither_followed_nor_collected() {
    let (client, connector) = client(deep_tree(), config(3));
    let seen = Seen::default();
    client.traverse_folder("/srv", seen.traversal().collect_directories(true));
    client.start().unwrap();
    settle(&client).await;

    let collected = seen.sorted();
    assert!(!collected.iter().any(|p| p.contains("loop")));
    assert!(!connector
        .stats()
        .dirs_opened
        .iter()
        .any(|p| p == "/srv/loop"));
    assert_eq!(
        collected,
        vec![
            "/srv/.git",
            "/srv/.git/HEAD",
            "/srv/a",
            "/srv/a/a.txt",
            "/srv/a/b",
            "/srv/a/b/b.txt",
            "/srv/r.log",
            "/srv/r.txt",
        ]
    );
}

#[tokio::test]
async fn test_stock_filters_bound_the_walk() {
    let (client, connector) = client(deep_tree(), config(2));
    let seen = Seen::default();
    let mut options = seen.traversal();
    options.traverse_filter = Some(filters::all_of(vec![
        filters::hidden(false),
        filters::max_depth("/srv", 1),
    ]));
    options.collect_filter = Some(filters::glob("*.txt").unwrap());
    client.traverse_folder("/srv", options);
    client.start().unwrap();
    settle(&client).await;

    assert_eq!(seen.sorted(), vec!["/srv/a/a.txt", "/srv/r.txt"]);
    let mut opened = connector.stats().dirs_opened;
    opened.sort();
    assert_eq!(opened, vec!["/srv", "/srv/a"]);
}

#[tokio::test]
async fn test_default_collector_walks_whole_tree() {
    let (client, connector) = client(small_tree(), config(1));
    client.traverse_folder("/root", TraverseOptions::new());
    client.start().unwrap();
    settle(&client).await;

    assert_eq!(connector.stats().dirs_opened.len(), 2);
    assert_eq!(connector.stats().handles_closed, 2);
}

#[tokio::test]
async fn test_trailing_slash_root() {
    let fs = MemoryFs::new()
        .with_dir("/", vec![DirEntry::directory("etc")])
        .with_dir("/etc", vec![DirEntry::file("hosts", 1)]);
    let (client, _connector) = client(fs, config(2));
    let seen = Seen::default();
    client.traverse_folder("/", seen.traversal());
    client.start().unwrap();
    settle(&client).await;

    assert_eq!(seen.take(), vec!["/etc/hosts"]);
}
