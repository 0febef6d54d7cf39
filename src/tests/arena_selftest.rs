use crate::arena::SlotArena;

#[test]
fn stale_key_does_not_resolve_after_reuse() {
    let mut arena = SlotArena::new();
    let first = arena.insert("first");
    assert_eq!(arena.remove(first), Some("first"));

    let second = arena.insert("second");
    assert_eq!(first.index(), second.index(), "free slot should be reused");
    assert_ne!(first.generation(), second.generation());
    assert_eq!(arena.get(first), None);
    assert_eq!(arena.get(second), Some(&"second"));
    assert_eq!(arena.remove(first), None);
    assert_eq!(arena.len(), 1);
}

#[test]
fn insert_with_sees_its_own_key() {
    let mut arena = SlotArena::new();
    let _ = arena.insert(0u32);
    let key = arena.insert_with(|key| key.index());
    assert_eq!(arena.get(key), Some(&1));
}

#[test]
fn iteration_skips_removed_slots_and_drain_empties() {
    let mut arena = SlotArena::new();
    let a = arena.insert('a');
    let b = arena.insert('b');
    let c = arena.insert('c');
    arena.remove(b);

    let live: Vec<char> = arena.iter().map(|(_, value)| *value).collect();
    assert_eq!(live, vec!['a', 'c']);

    let drained = arena.drain();
    assert_eq!(drained, vec!['a', 'c']);
    assert_eq!(arena.len(), 0);
    assert_eq!(arena.get(a), None);
    assert_eq!(arena.get(c), None);
}
