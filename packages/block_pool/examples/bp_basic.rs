//! Basic usage of the `block_pool` crate:
//!
//! * Creating a pool.
//! * Obtaining objects from it.
//! * Releasing objects back to it.
//! * Managing the reserved blocks.

use block_pool::BlockPool;

fn main() {
    // Every block holds 16 strings. One block is reserved up front.
    let mut pool = BlockPool::<String, 16>::new();

    let alice = pool.get("Alice".to_string());
    let bob = pool.get_with(|| format!("B{}", "ob"));

    println!(
        "Pool holds {} objects in {} block(s), with capacity for {}",
        pool.len(),
        pool.block_count(),
        pool.capacity()
    );

    // The pool hands out pointers. It never creates references to the objects itself,
    // so we are free to do so as long as we respect the aliasing rules.
    // SAFETY: `alice` is live and nothing else references it.
    let alice_ref = unsafe { alice.as_ref() };
    println!("Retrieved object: {alice_ref}");

    // Releasing drops the object and makes its slot available again.
    // SAFETY: `bob` came from this pool and is released exactly once.
    unsafe { pool.release(bob) }.expect("bob was obtained from this pool");

    // Reserve room for many more objects ahead of time.
    pool.add_blocks(3).expect("three is a valid block count");
    println!("After growing: {} blocks", pool.block_count());

    // Only blocks without live objects can be removed, so `alice` keeps her block.
    let remaining = pool.resize(0);
    println!("After shrinking as far as possible: {remaining} block(s)");

    // SAFETY: `alice` came from this pool and is released exactly once.
    unsafe { pool.release(alice) }.expect("alice was obtained from this pool");
}
