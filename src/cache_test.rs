use super::*;
use crate::message::test_helpers::{ids, msg, msg_with_content, page};
use crate::target::ChatKeys;

fn key(chat: &str) -> ConversationKey {
    ChatKeys::for_chat(chat).query
}

/// Cache with `key("c1")` seeded from `pages` under a live session.
fn seeded(pages: Vec<Page>) -> (FeedCache, ConversationKey, u64) {
    let mut cache = FeedCache::new(8);
    let k = key("c1");
    let epoch = cache.begin_session(&k);
    let mut iter = pages.into_iter();
    if let Some(first) = iter.next() {
        assert!(cache.begin_first_fetch(&k, epoch));
        assert_eq!(cache.complete_first_fetch(&k, epoch, Ok(first)), Merge::Applied);
    }
    for older in iter {
        assert!(cache.begin_next_fetch(&k, epoch).is_some());
        assert_eq!(cache.complete_next_fetch(&k, epoch, Ok(older)), Merge::Applied);
    }
    (cache, k, epoch)
}

fn page_ids(cache: &FeedCache, k: &ConversationKey) -> Vec<Vec<String>> {
    cache
        .get(k)
        .unwrap()
        .pages()
        .iter()
        .map(|p| ids(p).into_iter().map(str::to_owned).collect())
        .collect()
}

// =============================================================
// Seed / append
// =============================================================

#[test]
fn first_fetch_seeds_single_page() {
    let (cache, k, _) = seeded(vec![page(&["m5", "m4"], Some("m4"))]);
    let state = cache.get(&k).unwrap();
    assert_eq!(state.status(), FetchStatus::Success);
    assert_eq!(page_ids(&cache, &k), vec![vec!["m5", "m4"]]);
    assert!(state.has_more());
}

#[test]
fn first_fetch_replaces_existing_pages() {
    let (mut cache, k, _) = seeded(vec![page(&["m5", "m4"], Some("m4")), page(&["m3"], None)]);
    let epoch = cache.begin_session(&k);
    assert!(cache.begin_first_fetch(&k, epoch));
    cache.complete_first_fetch(&k, epoch, Ok(page(&["m6", "m5"], Some("m5"))));
    assert_eq!(page_ids(&cache, &k), vec![vec!["m6", "m5"]]);
}

#[test]
fn follow_up_appends_and_exhausts_history() {
    let (mut cache, k, epoch) = seeded(vec![page(&["m5", "m4"], Some("m4")), page(&["m3", "m2"], Some("m2"))]);

    let cursor = cache.begin_next_fetch(&k, epoch).unwrap();
    assert_eq!(cursor, Cursor("m2".into()));
    cache.complete_next_fetch(&k, epoch, Ok(page(&["m1"], None)));

    assert_eq!(page_ids(&cache, &k), vec![vec!["m5", "m4"], vec!["m3", "m2"], vec!["m1"]]);
    assert!(!cache.get(&k).unwrap().has_more());
    assert!(cache.begin_next_fetch(&k, epoch).is_none());
}

#[test]
fn appending_never_removes_or_reorders_existing_messages() {
    let (mut cache, k, epoch) = seeded(vec![page(&["m9", "m8"], Some("m8"))]);
    let mut before = page_ids(&cache, &k);
    let mut count = cache.get(&k).unwrap().message_count();

    for (i, older) in [["m7", "m6"], ["m5", "m4"], ["m3", "m2"]].iter().enumerate() {
        let cursor = if i == 2 { None } else { Some(older[1]) };
        assert!(cache.begin_next_fetch(&k, epoch).is_some());
        cache.complete_next_fetch(&k, epoch, Ok(page(older, cursor)));

        let after = page_ids(&cache, &k);
        assert_eq!(&after[..before.len()], &before[..]);
        let new_count = cache.get(&k).unwrap().message_count();
        assert!(new_count >= count);
        before = after;
        count = new_count;
    }
    assert_eq!(count, 8);
}

#[test]
fn duplicate_ids_across_pages_are_kept() {
    let (mut cache, k, epoch) = seeded(vec![page(&["m3", "m2"], Some("m2"))]);
    assert!(cache.begin_next_fetch(&k, epoch).is_some());
    cache.complete_next_fetch(&k, epoch, Ok(page(&["m2", "m1"], None)));
    assert_eq!(cache.get(&k).unwrap().message_count(), 4);
}

// =============================================================
// Fetch serialization / errors
// =============================================================

#[test]
fn second_follow_up_is_refused_while_one_is_in_flight() {
    let (mut cache, k, epoch) = seeded(vec![page(&["m5", "m4"], Some("m4"))]);
    assert!(cache.begin_next_fetch(&k, epoch).is_some());
    assert!(cache.begin_next_fetch(&k, epoch).is_none());
    assert!(cache.snapshot(&k).unwrap().fetching_more);

    cache.complete_next_fetch(&k, epoch, Ok(page(&["m3"], Some("m3"))));
    assert!(!cache.snapshot(&k).unwrap().fetching_more);
    assert_eq!(cache.begin_next_fetch(&k, epoch), Some(Cursor("m3".into())));
}

#[test]
fn follow_up_refused_before_first_page() {
    let mut cache = FeedCache::new(4);
    let k = key("c1");
    let epoch = cache.begin_session(&k);
    assert!(cache.begin_first_fetch(&k, epoch));
    assert!(!cache.begin_first_fetch(&k, epoch));
    assert!(cache.begin_next_fetch(&k, epoch).is_none());
    assert_eq!(cache.snapshot(&k).unwrap().status, FetchStatus::Pending);
}

#[test]
fn first_fetch_refused_while_older_page_in_flight() {
    let (mut cache, k, epoch) = seeded(vec![page(&["m5", "m4"], Some("m4"))]);
    assert_eq!(cache.begin_next_fetch(&k, epoch), Some(Cursor("m4".into())));
    assert!(!cache.begin_first_fetch(&k, epoch));

    cache.complete_next_fetch(&k, epoch, Ok(page(&["m3", "m2"], None)));
    assert_eq!(page_ids(&cache, &k), vec![vec!["m5", "m4"], vec!["m3", "m2"]]);

    assert!(cache.begin_first_fetch(&k, epoch));
    cache.complete_first_fetch(&k, epoch, Ok(page(&["m7", "m6"], Some("m6"))));
    assert_eq!(page_ids(&cache, &k), vec![vec!["m7", "m6"]]);
    assert_eq!(cache.begin_next_fetch(&k, epoch), Some(Cursor("m6".into())));
}

#[test]
fn first_fetch_error_is_terminal_for_feed() {
    let mut cache = FeedCache::new(4);
    let k = key("c1");
    let epoch = cache.begin_session(&k);
    assert!(cache.begin_first_fetch(&k, epoch));
    cache.complete_first_fetch(&k, epoch, Err(FeedError::FetchResponse { status: 500, body: String::new() }));

    let snap = cache.snapshot(&k).unwrap();
    assert_eq!(snap.status, FetchStatus::Error);
    assert!(!snap.is_fetching);
    assert!(matches!(snap.error, Some(FeedError::FetchResponse { status: 500, .. })));
}

#[test]
fn follow_up_error_keeps_pages_and_retry_clears_error() {
    let (mut cache, k, epoch) = seeded(vec![page(&["m5", "m4"], Some("m4"))]);
    assert!(cache.begin_next_fetch(&k, epoch).is_some());
    cache.complete_next_fetch(&k, epoch, Err(FeedError::FetchRequest("reset".into())));

    let snap = cache.snapshot(&k).unwrap();
    assert_eq!(snap.status, FetchStatus::Error);
    assert_eq!(snap.pages.len(), 1);
    assert!(cache.begin_next_fetch(&k, epoch).is_none());

    assert!(cache.begin_first_fetch(&k, epoch));
    let snap = cache.snapshot(&k).unwrap();
    assert_eq!(snap.status, FetchStatus::Success);
    assert!(snap.error.is_none());
}

// =============================================================
// Stale results
// =============================================================

#[test]
fn result_after_release_is_discarded() {
    let mut cache = FeedCache::new(4);
    let k = key("c1");
    let epoch = cache.begin_session(&k);
    assert!(cache.begin_first_fetch(&k, epoch));
    cache.release(&k);

    assert_eq!(cache.complete_first_fetch(&k, epoch, Ok(page(&["m1"], None))), Merge::Stale);
    assert!(cache.get(&k).unwrap().pages().is_empty());
}

#[test]
fn result_from_previous_mount_is_discarded() {
    let (mut cache, k, old_epoch) = seeded(vec![page(&["m5", "m4"], Some("m4"))]);
    assert!(cache.begin_next_fetch(&k, old_epoch).is_some());

    let new_epoch = cache.begin_session(&k);
    assert_ne!(new_epoch, old_epoch);
    assert_eq!(cache.complete_next_fetch(&k, old_epoch, Ok(page(&["m3"], None))), Merge::Stale);
    assert_eq!(page_ids(&cache, &k), vec![vec!["m5", "m4"]]);
    assert!(!cache.snapshot(&k).unwrap().fetching_more);
}

#[test]
fn result_for_evicted_feed_is_discarded() {
    let mut cache = FeedCache::new(4);
    let k = key("c1");
    let epoch = cache.begin_session(&k);
    assert!(cache.begin_first_fetch(&k, epoch));
    assert!(cache.evict(&k));
    assert_eq!(cache.complete_first_fetch(&k, epoch, Ok(page(&["m1"], None))), Merge::Stale);
    assert!(!cache.contains(&k));
}

// =============================================================
// Live inserts
// =============================================================

#[test]
fn live_added_into_empty_feed_creates_single_page() {
    let mut cache = FeedCache::new(4);
    let k = key("c1");
    cache.insert_live(&k, msg("m1"));

    let snap = cache.snapshot(&k).unwrap();
    assert_eq!(snap.pages.len(), 1);
    assert_eq!(ids(&snap.pages[0]), vec!["m1"]);
    assert!(!snap.has_more);
    assert_eq!(snap.status, FetchStatus::Success);
}

#[test]
fn live_added_before_first_fetch_completes() {
    let mut cache = FeedCache::new(4);
    let k = key("c1");
    let epoch = cache.begin_session(&k);
    assert!(cache.begin_first_fetch(&k, epoch));
    cache.insert_live(&k, msg("m1"));
    assert_eq!(page_ids(&cache, &k), vec![vec!["m1"]]);

    cache.complete_first_fetch(&k, epoch, Ok(page(&["m1", "m0"], None)));
    assert_eq!(page_ids(&cache, &k), vec![vec!["m1", "m0"]]);
}

#[test]
fn live_added_events_prepend_in_arrival_order() {
    let (mut cache, k, _) = seeded(vec![page(&["m2", "m1"], Some("m1")), page(&["m0"], None)]);
    for id in ["a1", "a2", "a3", "a4"] {
        cache.insert_live(&k, msg(id));
    }
    assert_eq!(page_ids(&cache, &k), vec![vec!["a4", "a3", "a2", "a1", "m2", "m1"], vec!["m0"]]);
}

#[test]
fn repeated_added_event_duplicates() {
    let (mut cache, k, _) = seeded(vec![page(&["m1"], None)]);
    cache.insert_live(&k, msg("a1"));
    cache.insert_live(&k, msg("a1"));
    assert_eq!(page_ids(&cache, &k), vec![vec!["a1", "a1", "m1"]]);
}

// =============================================================
// Live updates
// =============================================================

#[test]
fn live_update_replaces_in_place_in_older_page() {
    let (mut cache, k, _) = seeded(vec![page(&["m5", "m4"], Some("m4")), page(&["m3", "m2"], Some("m2"))]);
    let before_newest = cache.get(&k).unwrap().pages()[0].clone();

    assert!(cache.replace_live(&k, msg_with_content("m3", "C")));

    let state = cache.get(&k).unwrap();
    assert_eq!(state.pages()[0], before_newest);
    assert_eq!(ids(&state.pages()[1]), vec!["m3", "m2"]);
    assert_eq!(state.pages()[1].items[0].content.as_deref(), Some("C"));
}

#[test]
fn live_update_replaces_every_duplicate() {
    let (mut cache, k, _) = seeded(vec![page(&["m2", "m1"], Some("m1")), page(&["m0"], None)]);
    cache.insert_live(&k, msg("m1"));
    cache.insert_live(&k, msg("m0"));

    assert!(cache.replace_live(&k, msg_with_content("m1", "edited")));
    assert!(cache.replace_live(&k, msg_with_content("m0", "older edit")));

    let state = cache.get(&k).unwrap();
    let contents = |id: &str| -> Vec<Option<String>> {
        state
            .pages()
            .iter()
            .flat_map(|p| p.items.iter())
            .filter(|m| m.id == id)
            .map(|m| m.content.clone())
            .collect()
    };
    assert_eq!(contents("m1"), vec![Some("edited".to_owned()); 2]);
    assert_eq!(contents("m0"), vec![Some("older edit".to_owned()); 2]);
    assert_eq!(page_ids(&cache, &k), vec![vec!["m0", "m1", "m2", "m1"], vec!["m0"]]);
}

#[test]
fn live_update_is_idempotent() {
    let (mut once, k, _) = seeded(vec![page(&["m2", "m1"], None)]);
    let (mut twice, _, _) = seeded(vec![page(&["m2", "m1"], None)]);
    let edit = msg_with_content("m1", "edited");

    once.replace_live(&k, edit.clone());
    twice.replace_live(&k, edit.clone());
    twice.replace_live(&k, edit);

    assert_eq!(once.snapshot(&k), twice.snapshot(&k));
}

#[test]
fn live_update_for_unknown_id_changes_nothing() {
    let (mut cache, k, _) = seeded(vec![page(&["m2", "m1"], None)]);
    let before = cache.snapshot(&k);
    assert!(!cache.replace_live(&k, msg_with_content("zz", "nope")));
    assert_eq!(cache.snapshot(&k), before);
}

#[test]
fn live_update_for_uncached_feed_is_ignored() {
    let mut cache = FeedCache::new(4);
    assert!(!cache.replace_live(&key("c1"), msg("m1")));
    assert!(cache.is_empty());
}

// =============================================================
// Lifecycle
// =============================================================

#[test]
fn lru_evicts_least_recently_used_feed() {
    let mut cache = FeedCache::new(2);
    cache.begin_session(&key("a"));
    cache.release(&key("a"));
    cache.begin_session(&key("b"));
    cache.release(&key("b"));
    cache.insert_live(&key("a"), msg("m1"));
    cache.begin_session(&key("c"));

    assert_eq!(cache.len(), 2);
    assert!(cache.contains(&key("a")));
    assert!(!cache.contains(&key("b")));
    assert!(cache.contains(&key("c")));
}

#[test]
fn lru_never_evicts_mounted_feed() {
    let mut cache = FeedCache::new(1);
    let a = key("a");
    let ea = cache.begin_session(&a);
    assert!(cache.begin_first_fetch(&a, ea));
    cache.complete_first_fetch(&a, ea, Ok(page(&["m1"], None)));
    assert!(cache.get(&a).unwrap().is_mounted());

    cache.begin_session(&key("b"));
    assert_eq!(cache.len(), 2);
    cache.insert_live(&a, msg("a1"));

    assert_eq!(page_ids(&cache, &a), vec![vec!["a1", "m1"]]);
    assert!(cache.begin_first_fetch(&a, ea));

    cache.release(&key("b"));
    cache.begin_session(&key("c"));
    assert!(!cache.contains(&key("b")));
    assert!(cache.contains(&a));
}

#[test]
fn evict_reports_presence() {
    let mut cache = FeedCache::new(2);
    cache.begin_session(&key("a"));
    assert!(cache.evict(&key("a")));
    assert!(!cache.evict(&key("a")));
}

#[tokio::test]
async fn store_notifies_watchers_on_write() {
    let store = FeedStore::new(4);
    let mut rx = store.watch();
    let k = key("c1");

    store.insert_live(&k, msg("m1"));
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), store.revision());
    assert_eq!(store.snapshot(&k).unwrap().newest_page_len(), 1);
}

#[test]
fn store_clones_share_state() {
    let store = FeedStore::new(4);
    let other = store.clone();
    let k = key("c1");
    other.insert_live(&k, msg("m1"));
    assert!(store.replace_live(&k, msg_with_content("m1", "x")));
    assert_eq!(store.snapshot(&k).unwrap().pages[0].items[0].content.as_deref(), Some("x"));
}
