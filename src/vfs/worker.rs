// Worker pool and job plumbing.
//
// Client calls become Jobs; a fixed pool of worker threads drains a shared
// FIFO and runs each job through the dispatcher. Two reserved workers sit
// outside the pool: the system worker services privileged control calls on
// its own queue so they never starve behind client work, and the deadlock
// breaker runs at most one job at a time for requests that originate from a
// mounted server while every normal worker is occupied. Revived jobs jump
// the queue so a call that already waited once is not penalized again.

use crate::interface::{
    CallId, RustAtomicBool, RustAtomicOrdering, RustAtomicU64, RustCondvar, RustDeque,
    RustLazyGlobal, RustMutex, RustRfc,
};
use crate::vfs::message::{CtlCall, CtlResult, Origin, Pid, VfsCall};

pub const NR_WTHREADS: usize = 4;

static NEXT_CALL_ID: RustAtomicU64 = RustAtomicU64::new(1);

pub fn fresh_call_id() -> CallId {
    CallId(NEXT_CALL_ID.fetch_add(1, RustAtomicOrdering::Relaxed))
}

/// Identity a job presents to the lock layer and the transport.
#[derive(Debug, Clone, Copy)]
pub struct CallCtx {
    pub call: CallId,
    pub pid: Pid,
    pub origin: Origin,
}

/// One-shot slot the calling thread blocks on until its job replies.
pub struct ReplySlot {
    st: RustMutex<Option<i32>>,
    cv: RustCondvar,
}

impl ReplySlot {
    pub fn new() -> ReplySlot {
        ReplySlot {
            st: RustMutex::new(None),
            cv: RustCondvar::new(),
        }
    }

    pub fn complete(&self, code: i32) {
        let mut st = self.st.lock();
        assert!(st.is_none(), "job replied twice");
        *st = Some(code);
        self.cv.notify_all();
    }

    pub fn wait(&self) -> i32 {
        let mut st = self.st.lock();
        while st.is_none() {
            self.cv.wait(&mut st);
        }
        st.unwrap()
    }

    pub fn is_done(&self) -> bool {
        self.st.lock().is_some()
    }
}

impl Default for ReplySlot {
    fn default() -> Self {
        ReplySlot::new()
    }
}

pub struct Job {
    pub call_id: CallId,
    pub pid: Pid,
    pub origin: Origin,
    pub call: VfsCall,
    pub reply: RustRfc<ReplySlot>,
    /// Running (or destined for) the deadlock breaker.
    pub reserved: bool,
}

impl Job {
    pub fn ctx(&self) -> CallCtx {
        CallCtx {
            call: self.call_id,
            pid: self.pid,
            origin: self.origin,
        }
    }
}

pub struct SysJob {
    pub call: CtlCall,
    pub reply: RustRfc<SysReplySlot>,
}

pub struct SysReplySlot {
    st: RustMutex<Option<CtlResult>>,
    cv: RustCondvar,
}

impl SysReplySlot {
    pub fn new() -> SysReplySlot {
        SysReplySlot {
            st: RustMutex::new(None),
            cv: RustCondvar::new(),
        }
    }

    pub fn complete(&self, res: CtlResult) {
        let mut st = self.st.lock();
        assert!(st.is_none(), "control job replied twice");
        *st = Some(res);
        self.cv.notify_all();
    }

    pub fn wait(&self) -> CtlResult {
        let mut st = self.st.lock();
        while st.is_none() {
            self.cv.wait(&mut st);
        }
        st.take().unwrap()
    }
}

struct PoolState {
    queue: RustDeque<Job>,
    free: usize,
    spawned: usize,
    shutdown: bool,
}

struct SysState {
    queue: RustDeque<SysJob>,
    shutdown: bool,
}

struct DlState {
    slot: Option<Job>,
    busy: bool,
    shutdown: bool,
}

pub struct WorkerPool {
    normal: RustMutex<PoolState>,
    normal_cv: RustCondvar,
    sys: RustMutex<SysState>,
    sys_cv: RustCondvar,
    dl: RustMutex<DlState>,
    dl_cv: RustCondvar,
    handles: RustMutex<Vec<std::thread::JoinHandle<()>>>,
    running: RustAtomicBool,
}

pub static POOL: RustLazyGlobal<WorkerPool> = RustLazyGlobal::new(|| WorkerPool {
    normal: RustMutex::new(PoolState {
        queue: RustDeque::new(),
        free: 0,
        spawned: 0,
        shutdown: false,
    }),
    normal_cv: RustCondvar::new(),
    sys: RustMutex::new(SysState {
        queue: RustDeque::new(),
        shutdown: false,
    }),
    sys_cv: RustCondvar::new(),
    dl: RustMutex::new(DlState {
        slot: None,
        busy: false,
        shutdown: false,
    }),
    dl_cv: RustCondvar::new(),
    handles: RustMutex::new(Vec::new()),
    running: RustAtomicBool::new(false),
});

impl WorkerPool {
    pub fn start(&'static self, nthreads: usize) {
        if self.running.swap(true, RustAtomicOrdering::SeqCst) {
            return;
        }
        {
            let mut st = self.normal.lock();
            st.shutdown = false;
            st.spawned = nthreads;
        }
        self.sys.lock().shutdown = false;
        self.dl.lock().shutdown = false;
        let mut handles = self.handles.lock();
        for n in 0..nthreads {
            handles.push(
                std::thread::Builder::new()
                    .name(format!("vfs-worker-{}", n))
                    .spawn(move || POOL.normal_loop())
                    .unwrap(),
            );
        }
        handles.push(
            std::thread::Builder::new()
                .name("vfs-system".to_string())
                .spawn(move || POOL.sys_loop())
                .unwrap(),
        );
        handles.push(
            std::thread::Builder::new()
                .name("vfs-deadlock".to_string())
                .spawn(move || POOL.dl_loop())
                .unwrap(),
        );
    }

    fn normal_loop(&self) {
        loop {
            let job = {
                let mut st = self.normal.lock();
                st.free += 1;
                self.normal_cv.notify_all();
                loop {
                    if let Some(job) = st.queue.pop_front() {
                        st.free -= 1;
                        break Some(job);
                    }
                    if st.shutdown {
                        st.free -= 1;
                        break None;
                    }
                    self.normal_cv.wait(&mut st);
                }
            };
            match job {
                Some(job) => crate::vfs::dispatcher::run_job(job),
                None => return,
            }
        }
    }

    fn sys_loop(&self) {
        loop {
            let job = {
                let mut st = self.sys.lock();
                loop {
                    if let Some(job) = st.queue.pop_front() {
                        break Some(job);
                    }
                    if st.shutdown {
                        break None;
                    }
                    self.sys_cv.wait(&mut st);
                }
            };
            match job {
                Some(job) => crate::vfs::dispatcher::run_ctl_job(job),
                None => return,
            }
        }
    }

    fn dl_loop(&self) {
        loop {
            let job = {
                let mut st = self.dl.lock();
                loop {
                    if let Some(job) = st.slot.take() {
                        break Some(job);
                    }
                    if st.shutdown {
                        break None;
                    }
                    self.dl_cv.wait(&mut st);
                }
            };
            match job {
                Some(job) => {
                    crate::vfs::dispatcher::run_job(job);
                    self.dl.lock().busy = false;
                }
                None => return,
            }
        }
    }

    pub fn submit(&self, job: Job) {
        let mut st = self.normal.lock();
        st.queue.push_back(job);
        self.normal_cv.notify_all();
    }

    /// Revived jobs go to the head of the queue.
    pub fn submit_front(&self, job: Job) {
        let mut st = self.normal.lock();
        st.queue.push_front(job);
        self.normal_cv.notify_all();
    }

    pub fn submit_system(&self, job: SysJob) {
        let mut st = self.sys.lock();
        st.queue.push_back(job);
        self.sys_cv.notify_all();
    }

    /// Hands a job to the deadlock breaker; gives it back when the breaker
    /// already has one, in which case the caller fails the call with EAGAIN.
    pub fn submit_deadlock(&self, job: Job) -> Result<(), Job> {
        let mut st = self.dl.lock();
        if st.busy {
            return Err(job);
        }
        st.busy = true;
        st.slot = Some(job);
        self.dl_cv.notify_all();
        Ok(())
    }

    /// Workers neither running a job nor draining the queue right now.
    pub fn free_workers(&self) -> usize {
        let st = self.normal.lock();
        if st.queue.is_empty() {
            st.free
        } else {
            0
        }
    }

    pub fn queued(&self) -> usize {
        self.normal.lock().queue.len()
    }

    pub fn shutdown(&self) {
        if !self.running.swap(false, RustAtomicOrdering::SeqCst) {
            return;
        }
        self.normal.lock().shutdown = true;
        self.normal_cv.notify_all();
        self.sys.lock().shutdown = true;
        self.sys_cv.notify_all();
        self.dl.lock().shutdown = true;
        self.dl_cv.notify_all();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for h in handles {
            let _ = h.join();
        }
    }
}
