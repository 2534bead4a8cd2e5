use super::BufferPool;
use crate::utils::error::BufferError;

#[test]
fn test_acquire_until_exhausted() {
    let pool = BufferPool::new(2, 16);
    let a = pool.acquire().expect("first buffer");
    let b = pool.acquire().expect("second buffer");
    assert!(pool.acquire().is_none());
    assert_eq!(pool.available(), 0);

    pool.release(a);
    assert_eq!(pool.available(), 1);
    let c = pool.acquire().expect("buffer after release");
    drop(b);
    drop(c);
    assert_eq!(pool.available(), 2);
}

#[test]
fn test_fill_copies_topic_and_payload() {
    let pool = BufferPool::new(1, 8);
    let mut buf = pool.acquire().unwrap();
    buf.fill("a/b", b"hello").unwrap();
    assert_eq!(buf.topic(), "a/b");
    assert_eq!(buf.data(), b"hello");
    assert_eq!(buf.len(), 5);
}

#[test]
fn test_fill_rejects_oversized_payload() {
    let pool = BufferPool::new(1, 4);
    let mut buf = pool.acquire().unwrap();
    assert_eq!(
        buf.fill("t", b"too long"),
        Err(BufferError::TooLarge {
            len: 8,
            capacity: 4
        })
    );
}

#[test]
fn test_released_buffer_comes_back_clean() {
    let pool = BufferPool::new(1, 8);
    let mut buf = pool.acquire().unwrap();
    buf.fill("t", b"abc").unwrap();
    buf.release();

    let buf = pool.acquire().unwrap();
    assert!(buf.is_empty());
    assert_eq!(pool.size(), 1);
}

#[test]
fn test_pool_shared_across_threads() {
    let pool = BufferPool::new(4, 8);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    if let Some(mut buf) = pool.acquire() {
                        buf.fill("t", b"x").unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.available(), 4);
}
