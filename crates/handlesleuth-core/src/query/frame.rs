/// Per-thread reusable name query frames.
///
/// Each resolver worker keeps one spare frame. A query takes it, and hands
/// it back once the query thread is known to have exited. A frame whose
/// thread was abandoned is never handed back, so the next query on that
/// worker allocates a fresh one.
use super::NAME_BUFFER_BYTES;
use crate::platform::ntapi::UnicodeString;
use std::cell::Cell;
use std::mem::size_of;

/// Everything the query thread touches.
pub(crate) struct NameQueryFrame {
    pub(crate) handle: usize,
    pub(crate) buffer: Box<[u64]>,
}

/// Words covering the `UNICODE_STRING` header at the start of the buffer.
const HEADER_WORDS: usize = size_of::<UnicodeString>().div_ceil(size_of::<u64>());

thread_local! {
    static SPARE_FRAME: Cell<Option<Box<NameQueryFrame>>> = const { Cell::new(None) };
}

impl NameQueryFrame {
    fn allocate() -> Box<Self> {
        Box::new(Self {
            handle: 0,
            buffer: vec![0u64; NAME_BUFFER_BYTES.div_ceil(size_of::<u64>())].into_boxed_slice(),
        })
    }

    /// This thread's spare frame, or a new one, prepared for `handle`.
    pub(crate) fn take(handle: usize) -> Box<Self> {
        let mut frame = SPARE_FRAME.with(Cell::take).unwrap_or_else(Self::allocate);
        frame.handle = handle;
        frame.buffer[..HEADER_WORDS].fill(0);
        frame
    }

    /// Keep `frame` as this thread's spare.
    pub(crate) fn give_back(frame: Box<Self>) {
        SPARE_FRAME.with(|spare| spare.set(Some(frame)));
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.buffer.len() * size_of::<u64>()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: a `[u64]` is always viewable as `[u8]` of eight times the
        // length; the borrow keeps the allocation alive.
        unsafe { std::slice::from_raw_parts(self.buffer.as_ptr().cast::<u8>(), self.byte_len()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_object_name;

    #[test]
    fn returned_frame_is_reused_on_the_same_thread() {
        let first = NameQueryFrame::take(0x44);
        let address = first.buffer.as_ptr();
        NameQueryFrame::give_back(first);

        let second = NameQueryFrame::take(0x48);
        assert_eq!(second.buffer.as_ptr(), address);
        assert_eq!(second.handle, 0x48);
        assert!(second.byte_len() >= NAME_BUFFER_BYTES);
    }

    #[test]
    fn frame_kept_by_a_query_is_not_handed_out_again() {
        let kept = NameQueryFrame::take(0x44);
        let other = NameQueryFrame::take(0x48);
        assert_ne!(kept.buffer.as_ptr(), other.buffer.as_ptr());
        // Dropping stands in for an abandoned frame that is leaked.
        drop(kept);
        NameQueryFrame::give_back(other);
    }

    #[test]
    fn reused_frame_has_no_stale_name() {
        let mut frame = NameQueryFrame::take(0x44);
        frame.buffer[0] = 0x0010_0008; // length 8, capacity 16
        frame.buffer[HEADER_WORDS] = u64::from_ne_bytes(*b"s\0t\0a\0l\0");
        NameQueryFrame::give_back(frame);

        let frame = NameQueryFrame::take(0x48);
        assert_eq!(parse_object_name(frame.bytes()), None);
    }

    #[test]
    fn each_thread_has_its_own_spare() {
        let frame = NameQueryFrame::take(0x44);
        let address = frame.buffer.as_ptr() as usize;
        NameQueryFrame::give_back(frame);

        let elsewhere = std::thread::spawn(|| NameQueryFrame::take(0x44).buffer.as_ptr() as usize)
            .join()
            .unwrap();
        assert_ne!(elsewhere, address);
    }
}
