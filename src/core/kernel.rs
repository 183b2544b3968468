//! Global kernel state and initialization
//!
//! Everything the scheduler touches lives in one place: the TCB arena,
//! the ready queue, the running-task id, the timer arena, and the kernel
//! object pools, all inside a single [`KernelCtx`] guarded by a critical
//! section. Flags that interrupt handlers read on their fast path are
//! kept as atomics beside it.

use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::config::{CFG_IDLE_STK_SIZE, CFG_PRIO_IDLE, CFG_TICK_RATE_HZ};
use crate::critical::{critical_section, CriticalSection};
use crate::core::cs_cell::CsCell;
use crate::error::{KernelError, KernelResult};
use crate::sched::TaskQueue;
use crate::task::{Tcb, TcbPool};
use crate::time::TimerPool;
use crate::types::{NestingCtr, PendOn, StkElement, TaskId, TaskState, Tick, WakeStatus};

// ============ Kernel State Structures ============

/// Atomic kernel flags
pub(crate) struct KernelFlags {
    initialized: AtomicBool,
    started: AtomicBool,
    int_nesting: AtomicU8,
    tick_counter: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            started: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            tick_counter: AtomicU32::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        self.int_nesting.store(0, Ordering::SeqCst);
        self.tick_counter.store(0, Ordering::SeqCst);
    }

    /// Check if the scheduler has been started
    #[inline(always)]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Check if the kernel is initialized
    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn set_started(&self, val: bool) {
        self.started.store(val, Ordering::SeqCst);
    }

    /// Get current tick count
    #[inline(always)]
    pub fn tick_get(&self) -> Tick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    /// Overwrite the tick count
    #[inline(always)]
    pub(crate) fn tick_set(&self, ticks: Tick) {
        self.tick_counter.store(ticks, Ordering::Relaxed);
    }

    /// Increment and return the tick count
    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> Tick {
        self.tick_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get interrupt nesting level
    #[inline(always)]
    pub fn int_nesting(&self) -> NestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    /// Bump the interrupt nesting counter, saturating at the top.
    /// Load/store is enough here: a nested handler that interleaves
    /// runs its own balanced enter/exit pair before returning.
    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        if self.is_started() {
            let nesting = self.int_nesting.load(Ordering::Relaxed);
            if nesting < NestingCtr::MAX {
                self.int_nesting.store(nesting + 1, Ordering::Relaxed);
            }
        }
    }

    /// Drop the interrupt nesting counter, returning the new level
    #[inline(always)]
    pub(crate) fn int_nesting_dec(&self) -> NestingCtr {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.int_nesting.store(nesting - 1, Ordering::Relaxed);
        }
        nesting.saturating_sub(1)
    }
}

/// Global kernel flags instance
pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

/// All scheduler-visible kernel state
pub(crate) struct KernelCtx {
    pub tasks: TcbPool,
    pub ready: TaskQueue,
    /// Task owning the CPU; `None` until the scheduler starts
    pub current: Option<TaskId>,
    pub timers: TimerPool,
    #[cfg(feature = "sem")]
    pub sems: crate::sync::sem::SemPool,
    #[cfg(feature = "queue")]
    pub queues: crate::sync::queue::QueuePool,
}

impl KernelCtx {
    const fn new() -> Self {
        Self {
            tasks: TcbPool::new(),
            ready: TaskQueue::new(),
            current: None,
            timers: TimerPool::new(),
            #[cfg(feature = "sem")]
            sems: crate::sync::sem::SemPool::new(),
            #[cfg(feature = "queue")]
            queues: crate::sync::queue::QueuePool::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.tasks.reset();
        self.ready = TaskQueue::new();
        self.current = None;
        self.timers.reset();
        #[cfg(feature = "sem")]
        self.sems.reset();
        #[cfg(feature = "queue")]
        self.queues.reset();
    }
}

/// Global kernel context instance
static CTX: CsCell<KernelCtx> = CsCell::new(KernelCtx::new());

/// Borrow the kernel context for the duration of a critical section
#[inline(always)]
pub(crate) fn ctx<'cs>(cs: &'cs CriticalSection) -> &'cs mut KernelCtx {
    CTX.get(cs)
}

/// Id of the running task, or `InvalidContext` when called from an
/// interrupt handler or before the scheduler owns a task
pub(crate) fn running_task(k: &KernelCtx) -> KernelResult<TaskId> {
    if KERNEL.int_nesting() > 0 {
        return Err(KernelError::InvalidContext);
    }
    k.current.ok_or(KernelError::InvalidContext)
}

/// Common unblock path: disarm any timeout, clear the wait bookkeeping,
/// and hand the task back to the ready queue. The caller has already
/// removed the task from whatever wait list held it.
pub(crate) fn wake_task(k: &mut KernelCtx, id: TaskId, status: WakeStatus) {
    let timer = k.tasks.get_mut(id).timeout_timer.take();
    if let Some(timer) = timer {
        // a stale handle is fine, the timer may have just fired
        let _ = k.timers.cancel(timer);
    }
    let tcb = k.tasks.get_mut(id);
    tcb.pend_on = PendOn::Nothing;
    tcb.wake_status = status;
    tcb.state = TaskState::Ready;
    let enq = k.ready.enqueue(&mut k.tasks, id);
    debug_assert!(enq.is_ok());
}

// ============ CPU/Context Switch State ============

/// CPU context switch state, shared with the PendSV handler
#[repr(C)]
pub(crate) struct CpuState {
    /// Current running task's TCB pointer
    pub tcb_cur: *mut Tcb,
    /// TCB pointer of the task to switch to
    pub tcb_high_rdy: *mut Tcb,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            tcb_cur: core::ptr::null_mut(),
            tcb_high_rdy: core::ptr::null_mut(),
        }
    }

    pub fn reset(&mut self) {
        self.tcb_cur = core::ptr::null_mut();
        self.tcb_high_rdy = core::ptr::null_mut();
    }
}

/// Global CPU state instance
#[no_mangle]
#[used]
pub(crate) static mut CPU_STATE: CpuState = CpuState::new();

// ============ Initialization ============

/// IDLE task stack
static mut IDLE_STK: [StkElement; CFG_IDLE_STK_SIZE] = [0; CFG_IDLE_STK_SIZE];

/// Internal IDLE task function
fn os_idle_task(_arg: usize) -> ! {
    loop {
        cortex_m::asm::nop();
    }
}

/// Reset global kernel state
fn os_reset_globals(cs: &CriticalSection) {
    KERNEL.reset();
    ctx(cs).reset();
    unsafe {
        (*(&raw mut CPU_STATE)).reset();
    }
}

// ============ Public API ============

/// Initialize the RTOS kernel
///
/// Must be called before any other OS function. Clears all kernel state
/// and creates the IDLE task, so a stopped kernel may be initialized
/// again from scratch.
///
/// # Returns
/// * `Ok(())` - Initialization successful
/// * `Err(KernelError::AlreadyStarted)` - Scheduler is already running
pub fn os_init() -> KernelResult<()> {
    if KERNEL.is_started() {
        return Err(KernelError::AlreadyStarted);
    }

    critical_section(|cs| {
        os_reset_globals(cs);

        let k = ctx(cs);
        unsafe {
            crate::task::os_task_create_internal(
                k,
                "Idle",
                0,
                os_idle_task,
                0,
                CFG_PRIO_IDLE,
                (&raw mut IDLE_STK) as *mut StkElement,
                CFG_IDLE_STK_SIZE,
            )?;
        }

        KERNEL.set_initialized(true);
        Ok(())
    })
}

/// Start multitasking
///
/// Hands the CPU to the highest priority ready task. On hardware this
/// never returns; hosted builds come back once the port stub declines
/// the handoff.
///
/// # Returns
/// * `Err(KernelError::NotInit)` - [`os_init`] has not been called
/// * `Err(KernelError::AlreadyStarted)` - Scheduler is already running
pub fn os_start() -> KernelResult<()> {
    if !KERNEL.is_initialized() {
        return Err(KernelError::NotInit);
    }
    if KERNEL.is_started() {
        return Err(KernelError::AlreadyStarted);
    }

    critical_section(|cs| {
        let k = ctx(cs);
        let Some(first) = k.ready.dequeue_head(&mut k.tasks) else {
            return Err(KernelError::InvalidState);
        };
        let tcb = k.tasks.get_mut(first);
        tcb.state = TaskState::Running;
        let tcb_ptr: *mut Tcb = tcb;
        k.current = Some(first);

        unsafe {
            let cpu = &raw mut CPU_STATE;
            (*cpu).tcb_cur = tcb_ptr;
            (*cpu).tcb_high_rdy = tcb_ptr;
        }

        KERNEL.set_started(true);
        Ok(())
    })?;

    crate::port::os_cpu_systick_init(16_000_000 / CFG_TICK_RATE_HZ);

    crate::port::os_start_high_rdy();
    Ok(())
}

/// Enter ISR
///
/// Call on entry to every interrupt handler that may use kernel
/// services, paired with [`os_int_exit`].
#[inline]
pub fn os_int_enter() {
    KERNEL.int_enter();
}

/// Exit ISR
///
/// Drops the nesting counter and, once the outermost handler is
/// leaving, runs a scheduling pass. `from_tick` selects the tick-level
/// preemption rule, which lets an equal-priority task take over.
pub fn os_int_exit(from_tick: bool) {
    if !KERNEL.is_started() {
        return;
    }
    if KERNEL.int_nesting() == 0 {
        return;
    }
    if KERNEL.int_nesting_dec() == 0 {
        crate::sched::os_sched(from_tick);
    }
}

/// Get the id of the task this code is running in
///
/// Returns `None` from interrupt context and before [`os_start`].
pub fn os_task_current() -> Option<TaskId> {
    if KERNEL.int_nesting() > 0 {
        return None;
    }
    critical_section(|cs| ctx(cs).current)
}
