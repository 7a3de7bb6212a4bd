//! Buffer integration tests.
//!
//! Tests verify:
//! - Strength switching keeps the region in place and never double-frees
//! - Weak buffers refuse growth but accept writes within capacity
//! - External regions can be adopted through an ownership token
//! - Published buffers are shared read-only across threads

use std::ptr::NonNull;
use std::sync::Arc;

use wsi_tile_cache::buffer::{Buffer, RegionOwnership, Strength};
use wsi_tile_cache::error::BufferError;

// =============================================================================
// Strength Switching
// =============================================================================

#[test]
fn test_weaken_write_strengthen() {
    let mut buffer = Buffer::with_capacity(64).unwrap();
    buffer.append_slice(b"header").unwrap();
    let region = buffer.data();

    let ownership = buffer.weaken().unwrap();
    assert_eq!(buffer.strength(), Strength::Weak);
    assert_eq!(ownership.capacity(), 64);
    assert_eq!(Some(ownership.as_ptr()), region);

    // Writes inside the capacity still work while weak
    buffer.append_slice(b"-payload").unwrap();
    assert_eq!(buffer.as_slice(), b"header-payload");
    assert_eq!(buffer.available_bytes(), 64 - 14);

    // Growth does not
    assert_eq!(
        buffer.append(100).unwrap_err(),
        BufferError::InvalidOperation("cannot grow a weak buffer")
    );
    assert!(matches!(
        buffer.resize(128),
        Err(BufferError::InvalidOperation(_))
    ));
    assert_eq!(buffer.size(), 14);

    buffer.strengthen(ownership).unwrap();
    assert_eq!(buffer.strength(), Strength::Strong);
    assert_eq!(buffer.data(), region);

    // Strong again: growth works and keeps the contents
    buffer.prepare(1024).unwrap();
    assert!(buffer.capacity() >= 64 + 1024);
    assert_eq!(buffer.as_slice(), b"header-payload");
}

#[test]
fn test_strengthen_rejects_foreign_token() {
    let mut first = Buffer::from_vec(vec![1; 32]);
    let mut second = Buffer::from_vec(vec![2; 32]);
    let first_token = first.weaken().unwrap();
    let second_token = second.weaken().unwrap();

    let err = first.strengthen(second_token).unwrap_err();
    assert!(matches!(err.error, BufferError::InvalidArgument(_)));
    assert_eq!(first.strength(), Strength::Weak);

    // The rejected token comes back intact and still works for its owner
    second.strengthen(err.into_ownership()).unwrap();
    first.strengthen(first_token).unwrap();
    assert_eq!(first.as_slice(), &[1; 32]);
    assert_eq!(second.as_slice(), &[2; 32]);
}

#[test]
fn test_double_weaken_and_double_strengthen_fail() {
    let mut buffer = Buffer::from_vec(vec![0; 8]);
    let ownership = buffer.weaken().unwrap();
    assert!(matches!(
        buffer.weaken(),
        Err(BufferError::InvalidOperation(_))
    ));

    buffer.strengthen(ownership).unwrap();
    let mut other = Buffer::from_vec(vec![0; 8]);
    let token = other.weaken().unwrap();
    let err = buffer.strengthen(token).unwrap_err();
    assert!(matches!(err.error, BufferError::InvalidOperation(_)));
    other.strengthen(err.into_ownership()).unwrap();
}

// =============================================================================
// External Regions
// =============================================================================

#[test]
fn test_adopt_external_region() {
    let region: Box<[u8]> = vec![7u8; 48].into_boxed_slice();
    let ptr = NonNull::new(Box::into_raw(region) as *mut u8).unwrap();

    // SAFETY: the region came from a Box of 48 bytes and is only reached
    // through this buffer and token.
    let mut buffer = unsafe { Buffer::from_raw_parts(ptr, 16, 48) }.unwrap();
    let ownership = unsafe { RegionOwnership::from_raw_parts(ptr, 48) };

    assert_eq!(buffer.strength(), Strength::Weak);
    assert_eq!(buffer.as_slice(), &[7; 16]);
    assert!(buffer.prepare(1).is_err());

    buffer.strengthen(ownership).unwrap();
    buffer.append_slice(&[9; 64]).unwrap();
    assert_eq!(buffer.size(), 80);
    assert_eq!(&buffer.as_slice()[..16], &[7; 16]);
}

#[test]
fn test_wrap_static_region() {
    let region: &'static mut [u8] = Box::leak(vec![0u8; 32].into_boxed_slice());
    let mut buffer = Buffer::wrap_static(region, 0).unwrap();

    buffer.append(32).unwrap().fill(0xEE);
    assert!(buffer.end().is_none());
    assert_eq!(buffer.available_bytes(), 0);
    assert!(buffer.append(1).is_err());

    buffer.set_size(4).unwrap();
    assert_eq!(buffer.as_slice(), &[0xEE; 4]);
    assert!(buffer.end().is_some());
    assert!(matches!(
        buffer.set_size(33),
        Err(BufferError::InvalidArgument(_))
    ));
}

// =============================================================================
// Sharing
// =============================================================================

#[test]
fn test_shared_buffer_across_threads() {
    let mut buffer = Buffer::new();
    for chunk in 0..16u8 {
        buffer.append_slice(&[chunk; 256]).unwrap();
    }
    buffer.shrink_to_fit().unwrap();
    assert_eq!(buffer.capacity(), 4096);

    let shared = buffer.into_shared();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || shared.as_slice().iter().map(|b| *b as u64).sum::<u64>())
        })
        .collect();

    let expected: u64 = (0..16u64).map(|chunk| chunk * 256).sum();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
    assert_eq!(Arc::strong_count(&shared), 1);
}
