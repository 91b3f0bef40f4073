use std::alloc;

use super::page_size;

const DEFAULT_PAGES: usize = 16;

/// StackSize specifies desired stack size for new task.
///
/// It defaults to `16` times page size or [libc::MINSIGSTKSZ] depending on which one is bigger.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct StackSize {
    // 0: default, positive: extra bytes on top of default, negative: exact bytes
    size: isize,
}

impl StackSize {
    fn round_to_page(size: usize) -> usize {
        let mask = page_size::get() - 1;
        (size + mask) & !mask
    }

    fn bytes(&self) -> usize {
        let default = DEFAULT_PAGES * page_size::get();
        let size = match self.size {
            0 => default,
            1.. => default + Self::round_to_page(self.size as usize),
            _ => Self::round_to_page(self.size.unsigned_abs()),
        };
        size.max(libc::MINSIGSTKSZ)
    }

    /// Specifies extra stack size in addition to default.
    pub fn with_extra_size(size: usize) -> StackSize {
        assert!(size <= isize::MAX as usize, "stack size is too large");
        StackSize { size: size as isize }
    }

    /// Specifies desired stack size.
    pub fn with_size(size: usize) -> StackSize {
        assert!(size <= isize::MAX as usize, "stack size is too large");
        StackSize { size: -(size.max(1) as isize) }
    }
}

/// Page aligned stack with one inaccessible guard page at each end.
pub(crate) struct Stack {
    base: *mut u8,
    size: usize,
}

impl Stack {
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn layout(size: usize) -> alloc::Layout {
        let page_size = page_size::get();
        alloc::Layout::from_size_align(size + 2 * page_size, page_size).expect("stack size overflow")
    }

    fn protect(low: *mut u8, high: *mut u8, prot: libc::c_int) {
        let page_size = page_size::get();
        unsafe {
            libc::mprotect(low as *mut libc::c_void, page_size, prot);
            libc::mprotect(high as *mut libc::c_void, page_size, prot);
        }
    }

    pub fn alloc(size: StackSize) -> Stack {
        let page_size = page_size::get();
        let size = size.bytes();
        let layout = Self::layout(size);
        let low = unsafe { alloc::alloc(layout) };
        if low.is_null() {
            alloc::handle_alloc_error(layout);
        }
        let base = unsafe { low.add(page_size) };
        Self::protect(low, unsafe { base.add(size) }, libc::PROT_NONE);
        Stack { base, size }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // Zeroed stack of empty context.
        if self.base.is_null() {
            return;
        }
        let low = unsafe { self.base.sub(page_size::get()) };
        let high = unsafe { self.base.add(self.size) };
        Self::protect(low, high, libc::PROT_READ | libc::PROT_WRITE);
        unsafe { alloc::dealloc(low, Self::layout(self.size)) };
    }
}
