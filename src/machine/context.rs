//! Machine contexts.
//!
//! The simulated CPU runs one context at a time. Each context is backed by an
//! OS thread with a run latch; `switch` releases the target context and parks
//! the caller until it is released again, which is the thread-backed rendering
//! of a `switch_context(old, new)` register swap.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Start function of a process: receives its argument string, returns its
/// exit code.
pub type ProcEntry = fn(&str) -> i32;

/// Unwind payload used to collapse a parked context when the machine stops.
pub struct ShutdownToken;

struct Latch {
    runnable: bool,
}

struct Inner {
    name: String,
    supervisor: bool,
    latch: Mutex<Latch>,
    cond: Condvar,
}

/// Handle to a machine context. Cloning the handle does not clone the
/// context; both handles name the same thread.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

struct Registry {
    contexts: Vec<Arc<Inner>>,
    threads: Vec<JoinHandle<()>>,
    failure: Option<Box<dyn Any + Send>>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    contexts: Vec::new(),
    threads: Vec::new(),
    failure: None,
});

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

impl Context {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Park until this context is released. Must be called from the thread
    /// that owns the context.
    fn wait_released(&self) {
        let mut latch = self.inner.latch.lock().unwrap();
        while !latch.runnable {
            latch = self.inner.cond.wait(latch).unwrap();
        }
        latch.runnable = false;
        drop(latch);

        if SHUTDOWN.load(Ordering::SeqCst) && !self.inner.supervisor {
            // The machine halted while we were parked. Collapse the stack.
            resume_unwind(Box::new(ShutdownToken));
        }
    }

    fn release(&self) {
        let mut latch = self.inner.latch.lock().unwrap();
        latch.runnable = true;
        self.inner.cond.notify_all();
    }
}

/// The context of the executing thread.
pub fn current() -> Context {
    CURRENT.with(|c| c.borrow().clone()).expect("thread has no machine context")
}

/// Adopt the calling thread as the bootstrap context. This context doubles as
/// the shutdown supervisor: it is woken, rather than unwound, when the
/// machine halts.
pub fn bootstrap() -> Context {
    let inner = Arc::new(Inner {
        name: "bootstrap".to_string(),
        supervisor: true,
        latch: Mutex::new(Latch { runnable: false }),
        cond: Condvar::new(),
    });
    REGISTRY.lock().unwrap().contexts.push(inner.clone());
    let ctx = Context { inner };
    CURRENT.with(|c| *c.borrow_mut() = Some(ctx.clone()));
    ctx
}

/// Create a fresh context. The entry closure starts running the first time
/// the context is switched to.
pub fn spawn(
    name: &str,
    stack_size: usize,
    entry: Box<dyn FnOnce() + Send>,
) -> std::io::Result<Context> {
    let inner = Arc::new(Inner {
        name: name.to_string(),
        supervisor: false,
        latch: Mutex::new(Latch { runnable: false }),
        cond: Condvar::new(),
    });
    let ctx = Context { inner: inner.clone() };
    let thread_ctx = ctx.clone();

    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .stack_size(stack_size)
        .spawn(move || {
            CURRENT.with(|c| *c.borrow_mut() = Some(thread_ctx.clone()));
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                thread_ctx.wait_released();
                entry();
            }));
            if let Err(payload) = outcome {
                if !payload.is::<ShutdownToken>() {
                    // A real panic inside a process. Keep the payload so the
                    // supervisor can re-raise it on the boot thread.
                    REGISTRY.lock().unwrap().failure.get_or_insert(payload);
                    super::record_halt(1);
                    begin_shutdown();
                }
            }
        })?;

    let mut reg = REGISTRY.lock().unwrap();
    reg.contexts.push(inner);
    reg.threads.push(handle);
    Ok(ctx)
}

/// Switch the CPU from `from` (the executing context) to `to`.
pub fn switch(from: &Context, to: &Context) {
    to.release();
    from.wait_released();
}

/// Stop the machine: every parked context collapses, the supervisor wakes.
pub fn begin_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
    let reg = REGISTRY.lock().unwrap();
    for ctx in &reg.contexts {
        let mut latch = ctx.latch.lock().unwrap();
        latch.runnable = true;
        ctx.cond.notify_all();
    }
}

pub fn shutting_down() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Unwind the calling context out of kernel code during shutdown.
pub fn unwind_current() -> ! {
    resume_unwind(Box::new(ShutdownToken));
}

/// Join every context thread and return a recorded process panic, if any.
pub fn join_all() -> Option<Box<dyn Any + Send>> {
    let threads = {
        let mut reg = REGISTRY.lock().unwrap();
        std::mem::take(&mut reg.threads)
    };
    for handle in threads {
        let _ = handle.join();
    }
    REGISTRY.lock().unwrap().failure.take()
}
