//! Execution contexts decide where callbacks run and how delayed work is woken.
//!
//! A [`Context`] pairs an [`Executor`] with a [`Timer`]. Every operation that
//! dispatches user code takes one explicitly; [`Context::default`] runs
//! callbacks inline on the settling thread and uses a shared [`TimerThread`].
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    fmt,
    io,
    sync::{
        mpsc::{channel, Sender},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs somewhere: the current thread, a queue, a pool.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Invokes a job once `after` has elapsed.
pub trait Timer: Send + Sync {
    fn schedule(&self, after: Duration, job: Job);
}

/// Runs jobs on the calling thread, after the current inline job returns.
///
/// The outermost `execute` on a thread drains a thread-local FIFO; jobs
/// submitted while it drains are queued behind it instead of nesting. A chain
/// of N dependent callbacks therefore settles in constant stack depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Clears the thread's queue even if a job unwinds.
struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let abandoned = TRAMPOLINE.with(|queue| queue.borrow_mut().take());
        if let Some(jobs) = abandoned.filter(|jobs| !jobs.is_empty()) {
            tracing::warn!(dropped = jobs.len(), "inline job panicked; queued jobs dropped");
        }
    }
}

impl Executor for Inline {
    fn execute(&self, job: Job) {
        let first = TRAMPOLINE.with(|queue| {
            let mut queue = queue.borrow_mut();
            match queue.as_mut() {
                Some(pending) => {
                    pending.push_back(job);
                    None
                }
                None => {
                    *queue = Some(VecDeque::new());
                    Some(job)
                }
            }
        });
        let Some(first) = first else {
            return;
        };
        let _draining = Draining;
        first();
        while let Some(next) =
            TRAMPOLINE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        {
            next();
        }
    }
}

/// A single named worker thread running jobs in submission order.
///
/// # Examples
///
/// ```
/// use promise_chain::{Context, Promise, SerialQueue};
/// use futures::executor::block_on;
///
/// let queue = SerialQueue::new("worker").unwrap();
/// let ctx = Context::new(queue);
/// let doubled = Promise::<i32>::fulfilled(21).map(&ctx, |v| v * 2);
/// assert_eq!(block_on(doubled.settled()).unwrap(), 42);
/// ```
#[derive(Debug, Clone)]
pub struct SerialQueue {
    sender: Sender<Job>,
}

impl SerialQueue {
    /// Spawns the worker. It exits once every clone of the queue is dropped.
    pub fn new(name: impl Into<String>) -> io::Result<Self> {
        let (sender, receiver) = channel::<Job>();
        thread::Builder::new().name(name.into()).spawn(move || {
            for job in receiver {
                job()
            }
        })?;
        Ok(SerialQueue { sender })
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::warn!("serial queue worker is gone; job dropped");
        }
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the earliest deadline, ties in insertion order.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Wheel {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

struct TimerShared {
    wheel: Mutex<Wheel>,
    wakeup: Condvar,
}

/// One background thread firing jobs from a deadline-ordered heap.
///
/// Jobs run on the timer thread itself; [`Context::execute_after`] hops them
/// onto the context's executor.
pub struct TimerThread {
    shared: Arc<TimerShared>,
}

impl TimerThread {
    pub fn new() -> io::Result<Self> {
        let shared = Arc::new(TimerShared {
            wheel: Mutex::new(Wheel::default()),
            wakeup: Condvar::new(),
        });
        let worker = shared.clone();
        thread::Builder::new()
            .name("promise-timer".into())
            .spawn(move || run_timer(&worker))?;
        Ok(TimerThread { shared })
    }
}

fn run_timer(shared: &TimerShared) {
    let mut wheel = shared.wheel.lock();
    loop {
        if wheel.closed {
            return;
        }
        let now = Instant::now();
        match wheel.entries.peek().map(|entry| entry.deadline) {
            None => shared.wakeup.wait(&mut wheel),
            Some(deadline) if deadline > now => {
                shared.wakeup.wait_until(&mut wheel, deadline);
            }
            Some(_) => {
                if let Some(entry) = wheel.entries.pop() {
                    MutexGuard::unlocked(&mut wheel, entry.job);
                }
            }
        }
    }
}

impl Timer for TimerThread {
    fn schedule(&self, after: Duration, job: Job) {
        let mut wheel = self.shared.wheel.lock();
        let seq = wheel.next_seq;
        wheel.next_seq += 1;
        wheel.entries.push(Entry {
            deadline: Instant::now() + after,
            seq,
            job,
        });
        tracing::trace!(?after, seq, "timer scheduled");
        drop(wheel);
        self.shared.wakeup.notify_one();
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shared.wheel.lock().closed = true;
        self.shared.wakeup.notify_one();
    }
}

impl fmt::Debug for TimerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wheel = self.shared.wheel.lock();
        f.debug_struct("TimerThread")
            .field("scheduled", &wheel.entries.len())
            .finish()
    }
}

static DEFAULT_TIMER: Mutex<Option<Arc<TimerThread>>> = parking_lot::const_mutex(None);

/// The timer shared by contexts built without one, spawned on first use.
fn default_timer() -> io::Result<Arc<TimerThread>> {
    let mut slot = DEFAULT_TIMER.lock();
    if let Some(timer) = slot.as_ref() {
        return Ok(timer.clone());
    }
    let timer = Arc::new(TimerThread::new()?);
    *slot = Some(timer.clone());
    Ok(timer)
}

/// Where callbacks run, and which timer wakes delayed work.
#[derive(Clone)]
pub struct Context {
    executor: Arc<dyn Executor>,
    timer: Arc<dyn Timer>,
}

impl Context {
    /// Dispatches on `executor`, waking timed work on the shared default timer.
    ///
    /// # Panics
    ///
    /// Panics if the shared timer thread has not started yet and the OS
    /// refuses to spawn it. Use [`Context::try_new`] to get the error, or
    /// [`Context::from_parts`] to avoid the shared timer entirely.
    pub fn new(executor: impl Executor + 'static) -> Self {
        Context::try_new(executor)
            .unwrap_or_else(|err| panic!("failed to spawn default timer thread: {err}"))
    }

    pub fn try_new(executor: impl Executor + 'static) -> io::Result<Self> {
        Ok(Context {
            executor: Arc::new(executor),
            timer: default_timer()?,
        })
    }

    /// A context that never touches the shared timer.
    pub fn from_parts(executor: impl Executor + 'static, timer: impl Timer + 'static) -> Self {
        Context {
            executor: Arc::new(executor),
            timer: Arc::new(timer),
        }
    }

    /// Inline dispatch on the shared default timer.
    ///
    /// # Panics
    ///
    /// Same as [`Context::new`].
    pub fn inline() -> Self {
        Context::new(Inline)
    }

    pub fn with_timer(mut self, timer: impl Timer + 'static) -> Self {
        self.timer = Arc::new(timer);
        self
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        self.executor.execute(Box::new(job))
    }

    /// Runs `job` on this context's executor once `after` has elapsed.
    pub fn execute_after(&self, after: Duration, job: impl FnOnce() + Send + 'static) {
        let executor = self.executor.clone();
        self.timer
            .schedule(after, Box::new(move || executor.execute(Box::new(job))));
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::inline()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

#[cfg(feature = "tokio")]
pub use self::tokio_support::{TokioExecutor, TokioTimer};

#[cfg(feature = "tokio")]
mod tokio_support {
    use super::{Context, Executor, Job, Timer};
    use std::time::Duration;
    use tokio::runtime::Handle;

    /// Spawns each job as a task on a tokio runtime.
    #[derive(Debug, Clone)]
    pub struct TokioExecutor(pub Handle);

    impl Executor for TokioExecutor {
        fn execute(&self, job: Job) {
            self.0.spawn(async move { job() });
        }
    }

    /// Wakes delayed jobs with `tokio::time::sleep`.
    #[derive(Debug, Clone)]
    pub struct TokioTimer(pub Handle);

    impl Timer for TokioTimer {
        fn schedule(&self, after: Duration, job: Job) {
            self.0.spawn(async move {
                tokio::time::sleep(after).await;
                job()
            });
        }
    }

    impl Context {
        /// Dispatches and times everything on the given runtime.
        pub fn tokio(handle: Handle) -> Self {
            Context::from_parts(TokioExecutor(handle.clone()), TokioTimer(handle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_inline_queues_nested_jobs_behind_current() {
        let (tx, rx) = mpsc::channel();
        Inline.execute(Box::new(move || {
            let nested = tx.clone();
            Inline.execute(Box::new(move || nested.send("nested").unwrap()));
            tx.send("outer").unwrap();
        }));
        let order: Vec<_> = rx.try_iter().collect();
        assert_eq!(order, ["outer", "nested"]);
    }

    #[test]
    fn test_inline_recovers_after_panicking_job() {
        let result = std::panic::catch_unwind(|| Inline.execute(Box::new(|| panic!("boom"))));
        assert!(result.is_err());
        let (tx, rx) = mpsc::channel();
        Inline.execute(Box::new(move || tx.send(1).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_from_parts_uses_given_timer() {
        let timer = TimerThread::new().unwrap();
        let ctx = Context::from_parts(Inline, timer);
        let (tx, rx) = mpsc::channel();
        ctx.execute_after(Duration::from_millis(5), move || tx.send(()).unwrap());
        rx.recv().unwrap();
    }

    #[test]
    fn test_timer_fires_in_deadline_order() {
        let timer = TimerThread::new().unwrap();
        let (tx, rx) = mpsc::channel();
        for (label, ms) in [("slow", 60u64), ("fast", 10), ("mid", 30)] {
            let tx = tx.clone();
            timer.schedule(Duration::from_millis(ms), Box::new(move || tx.send(label).unwrap()));
        }
        let order: Vec<_> = (0..3).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(order, ["fast", "mid", "slow"]);
    }

    #[test]
    fn test_execute_after_waits_at_least_the_delay() {
        let ctx = Context::default();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        ctx.execute_after(Duration::from_millis(40), move || tx.send(()).unwrap());
        rx.recv().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_serial_queue_runs_jobs_in_order_off_thread() {
        let queue = SerialQueue::new("test-queue").unwrap();
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            queue.execute(Box::new(move || {
                tx.send((i, thread::current().id())).unwrap();
            }));
        }
        let seen: Vec<_> = (0..5).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), [0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(_, id)| *id != caller));
    }
}
