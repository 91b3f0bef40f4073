use std::mem;

use super::stack::{Stack, StackSize};

#[allow(improper_ctypes)] // suppress "`extern` block uses type `u128`, which is not FFI-safe"
extern "C" {
    fn getcontext(ucp: *mut libc::ucontext_t) -> libc::c_int;
    fn setcontext(ucp: *const libc::ucontext_t) -> libc::c_int;
    fn swapcontext(oucp: *mut libc::ucontext_t, ucp: *const libc::ucontext_t) -> libc::c_int;
    fn makecontext(ucp: *mut libc::ucontext_t, func: extern "C" fn(*mut libc::c_void), argc: libc::c_int, ...);
}

/// Saved execution state plus the stack it runs on.
#[repr(C, align(16))]
pub struct Context {
    stack: Stack,
    context: libc::ucontext_t,
    // macOS and its siblings embed mcontext inside ucontext while libc crate did not include them.
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos", target_os = "watchos"))]
    _mcontext: libc::__darwin_mcontext64,
}

/// Entry function of a fresh context.
#[derive(Debug)]
pub struct Entry {
    pub f: extern "C" fn(*mut libc::c_void),
    pub arg: *mut libc::c_void,
    pub stack_size: StackSize,
}

unsafe impl Sync for Context {}

impl Context {
    /// Context to be filled by [Context::switch], e.g. the scheduling thread's own.
    pub fn empty() -> Context {
        unsafe { mem::zeroed() }
    }

    // Boxed as ucontext could point into itself after getcontext.
    pub fn new(entry: &Entry) -> Box<Context> {
        let mut ctx = Box::new(Context::empty());
        let rc = unsafe { getcontext(&mut ctx.context) };
        if rc != 0 {
            panic!("getcontext returns {}", rc);
        }
        let stack = Stack::alloc(entry.stack_size);
        ctx.context.uc_stack.ss_sp = stack.base() as *mut libc::c_void;
        ctx.context.uc_stack.ss_size = stack.size();
        ctx.context.uc_link = std::ptr::null_mut();
        ctx.stack = stack;
        unsafe { makecontext(&mut ctx.context, entry.f, 1, entry.arg) };
        ctx
    }

    /// Jumps to this context, discarding current one.
    pub fn resume(&self) -> ! {
        let rc = unsafe { setcontext(&self.context) };
        panic!("setcontext returns {}", rc);
    }

    /// Saves current execution into `backup` and jumps to this context.
    pub fn switch(&self, backup: &mut Context) {
        let rc = unsafe { swapcontext(&mut backup.context, &self.context) };
        if rc != 0 {
            panic!("swapcontext returns {}", rc);
        }
    }
}
