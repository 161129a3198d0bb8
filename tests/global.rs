//! Installs the allocator as the process allocator and drives it through
//! ordinary std collections. Every allocation in this binary, the test
//! harness included, lands in the arena, so merely running to completion
//! proves that reserving the arena on first use does not re-enter the
//! allocator.

use binalloc::Binalloc;

#[global_allocator]
static ALLOCATOR: Binalloc = Binalloc::new();

#[test]
fn std_collections_run_on_the_arena() {
    let mut numbers = vec![1u8, 2, 3];
    numbers.extend(4u8..100);
    assert_eq!(numbers.len(), 99);
    assert_eq!(
        numbers.iter().map(|&n| u32::from(n)).sum::<u32>(),
        (1u32..100).sum::<u32>()
    );

    let text = "x".repeat(2000);
    assert_eq!(text.len(), 2000);

    let boxed = Box::new([7u64; 32]);
    assert_eq!(boxed.iter().sum::<u64>(), 7 * 32);

    let stats = ALLOCATOR.stats();
    assert!(stats.used_blocks > 0);
    assert!(stats.used_bytes >= numbers.len() + text.len());

    drop(numbers);
    drop(text);
    drop(boxed);
}
