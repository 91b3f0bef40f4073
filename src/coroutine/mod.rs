//! Stackful coroutines which carry tasks.
//!
//! Every task runs on its own coroutine, so it could suspend from arbitrarily deep call frames and
//! resume later on any scheduling thread with its whole call stack intact.

mod context;
mod page_size;
pub(crate) mod stack;

use std::cell::UnsafeCell;

use self::context::{Context, Entry};
use self::stack::StackSize;

thread_local! {
    static THREAD_CONTEXT: UnsafeCell<Context> = UnsafeCell::new(Context::empty());
}

/// Execution context of current scheduling thread.
struct ThisThread;

impl ThisThread {
    fn context<'a>() -> &'a Context {
        THREAD_CONTEXT.with(|c| unsafe { &*c.get() })
    }

    fn context_mut<'a>() -> &'a mut Context {
        THREAD_CONTEXT.with(|c| unsafe { &mut *c.get() })
    }

    fn enter(context: &Context) {
        context.switch(Self::context_mut());
    }

    fn leave(context: &mut Context) {
        Self::context().switch(context);
    }

    fn restore() -> ! {
        Self::context().resume()
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum Status {
    Suspended,
    Completed,
}

pub(crate) struct Coroutine {
    status: Status,
    context: Box<Context>,
    entry: Option<Box<dyn FnOnce()>>,
}

impl Coroutine {
    pub fn new(entry: Box<dyn FnOnce()>, stack_size: StackSize) -> Box<Coroutine> {
        let mut co =
            Box::new(Coroutine { status: Status::Suspended, context: Box::new(Context::empty()), entry: Some(entry) });
        let arg = (co.as_mut() as *mut Coroutine) as *mut libc::c_void;
        co.context = Context::new(&Entry { f: Self::main, arg, stack_size });
        co
    }

    extern "C" fn main(arg: *mut libc::c_void) {
        let co = unsafe { &mut *(arg as *mut Coroutine) };
        if let Some(f) = co.entry.take() {
            f();
        }
        co.status = Status::Completed;
        ThisThread::restore();
    }

    /// Runs this coroutine on calling thread until it suspends or completes.
    pub fn resume(&mut self) -> Status {
        assert_eq!(self.status, Status::Suspended, "resume: coroutine completed");
        ThisThread::enter(&self.context);
        self.status
    }

    /// Switches back to the thread which resumed this coroutine.
    ///
    /// Must be called from within this coroutine.
    pub fn suspend(&mut self) {
        ThisThread::leave(&mut self.context);
    }
}
