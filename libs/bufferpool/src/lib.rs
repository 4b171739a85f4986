#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Pooled, reusable packet buffers.
//!
//! The tunnel data path pulls a buffer out of a pool, reads or writes into
//! it, shifts its framing as it crosses the obfuscation/wire boundary
//! (`truncate_front` / `move_back`), and drops it back into the pool when
//! done. Reusing allocations here matters: the steady-state loop pulls one
//! buffer per packet, many times a second.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use bytes::BytesMut;

#[derive(Clone)]
pub struct BufferPool<B> {
    inner: Arc<lockfree_object_pool::MutexObjectPool<B>>,
}

impl<B> BufferPool<B>
where
    B: Buf,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(lockfree_object_pool::MutexObjectPool::new(
                move || B::with_capacity(capacity),
                |_| {},
            )),
        }
    }

    pub fn pull(&self) -> Buffer<B> {
        Buffer {
            inner: self.inner.pull_owned(),
            pool: self.inner.clone(),
        }
    }
}

impl<B> BufferPool<B>
where
    B: Buf + DerefMut<Target = [u8]>,
{
    pub fn pull_initialised(&self, data: &[u8]) -> Buffer<B> {
        let mut buffer = self.pull();
        let len = data.len();

        buffer.resize_to(len);
        buffer.copy_from_slice(data);

        buffer
    }
}

pub struct Buffer<B> {
    inner: lockfree_object_pool::MutexOwnedReusable<B>,
    pool: Arc<lockfree_object_pool::MutexObjectPool<B>>,
}

impl Buffer<Vec<u8>> {
    /// Truncates `num` bytes from the front of the buffer.
    ///
    /// Used when stripping an obfuscator or DNS-codec header off an inbound
    /// packet before it is handed further down the pipeline.
    pub fn truncate_front(&mut self, num: usize) {
        let current_len = self.len();

        self.copy_within(num.., 0);
        self.truncate(current_len - num);
    }

    /// Moves the buffer's content back by `num` bytes, returning the new
    /// space at the front for a header to be written into.
    pub fn move_back(&mut self, num: usize) -> &mut [u8] {
        let current_len = self.len();

        self.resize(current_len + num, 0);
        self.copy_within(..current_len, num);

        &mut self[..num]
    }
}

impl<B> Clone for Buffer<B>
where
    B: Buf,
{
    fn clone(&self) -> Self {
        let mut copy = self.pool.pull_owned();

        self.inner.clone(&mut copy);

        Self {
            inner: copy,
            pool: self.pool.clone(),
        }
    }
}

impl<B> PartialEq for Buffer<B>
where
    B: Deref<Target = [u8]>,
{
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl<B> Eq for Buffer<B> where B: Deref<Target = [u8]> {}

impl<B> std::fmt::Debug for Buffer<B>
where
    B: Deref<Target = [u8]>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Buffer").field(&self.len()).finish()
    }
}

impl<B> Deref for Buffer<B> {
    type Target = B;

    fn deref(&self) -> &Self::Target {
        self.inner.deref()
    }
}

impl<B> DerefMut for Buffer<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.deref_mut()
    }
}

/// What a pooled buffer type must support: allocate at a fixed capacity,
/// deep-copy into a sibling instance, and resize in place.
pub trait Buf: Sized {
    fn with_capacity(capacity: usize) -> Self;
    fn clone(&self, dst: &mut Self);
    fn resize_to(&mut self, len: usize);
}

impl Buf for Vec<u8> {
    fn with_capacity(capacity: usize) -> Self {
        vec![0; capacity]
    }

    fn clone(&self, dst: &mut Self) {
        dst.resize(self.len(), 0);
        dst.copy_from_slice(self);
    }

    fn resize_to(&mut self, len: usize) {
        self.resize(len, 0);
    }
}

impl Buf for BytesMut {
    fn with_capacity(capacity: usize) -> Self {
        BytesMut::zeroed(capacity)
    }

    fn clone(&self, dst: &mut Self) {
        dst.resize(self.len(), 0);
        dst.copy_from_slice(self);
    }

    fn resize_to(&mut self, len: usize) {
        self.resize(len, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_can_be_cloned() {
        let pool = BufferPool::<Vec<u8>>::new(1024);

        let buffer = pool.pull_initialised(b"hello world");

        #[allow(clippy::redundant_clone)]
        let buffer2 = buffer.clone();

        assert_eq!(&buffer2[..], &buffer[..]);
    }

    #[test]
    fn cloned_buffer_owns_its_own_memory() {
        let pool = BufferPool::<Vec<u8>>::new(1024);

        let buffer = pool.pull_initialised(b"hello world");

        let buffer2 = buffer.clone();
        drop(buffer);

        assert_eq!(&buffer2[..11], b"hello world");
    }

    #[test]
    fn initialised_buffer_is_only_as_long_as_content() {
        let pool = BufferPool::<Vec<u8>>::new(1024);

        let buffer = pool.pull_initialised(b"hello world");

        assert_eq!(buffer.len(), 11);
    }

    #[test]
    fn truncate_front_strips_a_header() {
        let pool = BufferPool::<Vec<u8>>::new(1024);
        let mut buffer = pool.pull_initialised(b"HEADERpayload");

        buffer.truncate_front(6);

        assert_eq!(&buffer[..], b"payload");
    }

    #[test]
    fn move_back_opens_space_for_a_header() {
        let pool = BufferPool::<Vec<u8>>::new(1024);
        let mut buffer = pool.pull_initialised(b"payload");

        {
            let header = buffer.move_back(3);
            header.copy_from_slice(b"HDR");
        }

        assert_eq!(&buffer[..], b"HDRpayload");
    }
}
