//! Time management module
//!
//! Wall tick accounting, one-shot software timers, and task delays.
//!
//! Timers live in a fixed arena and are handed out as generation-checked
//! [`TimerRef`] values, so a cancel against an already-fired or recycled
//! slot is refused instead of acting on the wrong timer. The active set
//! is an unordered list: registration is O(1), the tick scan is O(n).

use crate::config::CFG_MAX_TIMERS;
use crate::critical::critical_section;
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::sched;
#[cfg(any(feature = "sem", feature = "queue"))]
use crate::types::ObjRef;
use crate::types::{TaskId, TaskState, Tick, WakeStatus};

/// Validated handle to a registered timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRef {
    pub(crate) idx: u8,
    pub(crate) gen: u16,
}

/// Callback signature for application timers
pub type TimerCallback = fn(usize);

/// What a timer does when it fires
#[derive(Clone, Copy)]
pub(crate) enum TimerAction {
    /// Wake a delayed task
    Delay { task: TaskId },
    /// Time out a semaphore wait
    #[cfg(feature = "sem")]
    SemTimeout { task: TaskId, sem: ObjRef },
    /// Time out a blocked queue send
    #[cfg(feature = "queue")]
    QueuePutTimeout { task: TaskId, queue: ObjRef },
    /// Time out a blocked queue receive
    #[cfg(feature = "queue")]
    QueueGetTimeout { task: TaskId, queue: ObjRef },
    /// Run an application callback
    App { cb: TimerCallback, arg: usize },
}

struct TimerSlot {
    live: bool,
    gen: u16,
    /// Ticks until expiry; a live slot always holds at least 1
    remaining: Tick,
    action: Option<TimerAction>,
    /// Active-list link
    next: Option<u8>,
}

impl TimerSlot {
    const fn new() -> Self {
        TimerSlot {
            live: false,
            gen: 0,
            remaining: 0,
            action: None,
            next: None,
        }
    }
}

const TIMER_INIT: TimerSlot = TimerSlot::new();

/// Fixed arena of timer slots plus the unordered active list
pub(crate) struct TimerPool {
    slots: [TimerSlot; CFG_MAX_TIMERS],
    active: Option<u8>,
}

impl TimerPool {
    pub const fn new() -> Self {
        TimerPool {
            slots: [TIMER_INIT; CFG_MAX_TIMERS],
            active: None,
        }
    }

    /// Drop every registration. Generations of live slots are bumped so
    /// refs held across a kernel re-init stay stale.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            let gen = slot.gen.wrapping_add(slot.live as u16);
            *slot = TimerSlot::new();
            slot.gen = gen;
        }
        self.active = None;
    }

    /// Arm a one-shot timer. The new entry is pushed onto the head of
    /// the active list.
    pub fn register(&mut self, ticks: Tick, action: TimerAction) -> KernelResult<TimerRef> {
        if ticks == 0 {
            return Err(KernelError::InvalidParam);
        }
        let Some(idx) = self.slots.iter().position(|s| !s.live) else {
            return Err(KernelError::NoFreeTimer);
        };
        let head = self.active;
        let slot = &mut self.slots[idx];
        slot.live = true;
        slot.remaining = ticks;
        slot.action = Some(action);
        slot.next = head;
        self.active = Some(idx as u8);
        Ok(TimerRef {
            idx: idx as u8,
            gen: slot.gen,
        })
    }

    /// Disarm a timer. `NotFound` means the ref is stale: the timer
    /// already fired, was cancelled, or its slot was recycled.
    pub fn cancel(&mut self, timer: TimerRef) -> KernelResult<()> {
        let i = timer.idx as usize;
        if !self.slots[i].live || self.slots[i].gen != timer.gen {
            return Err(KernelError::NotFound);
        }
        self.unlink(timer.idx);
        self.retire(i);
        Ok(())
    }

    /// Advance every active timer by one tick. Due timers are retired
    /// here, inside the caller's critical section; their actions are
    /// written to `out` for the caller to run after leaving it.
    pub fn advance(&mut self, out: &mut [Option<TimerAction>; CFG_MAX_TIMERS]) -> usize {
        let mut n = 0;
        let mut prev: Option<u8> = None;
        let mut cur = self.active;
        while let Some(idx) = cur {
            let i = idx as usize;
            let next = self.slots[i].next;
            self.slots[i].remaining -= 1;
            if self.slots[i].remaining == 0 {
                match prev {
                    Some(p) => self.slots[p as usize].next = next,
                    None => self.active = next,
                }
                out[n] = self.slots[i].action;
                n += 1;
                self.retire(i);
            } else {
                prev = Some(idx);
            }
            cur = next;
        }
        n
    }

    fn unlink(&mut self, idx: u8) {
        let next = self.slots[idx as usize].next;
        let mut prev: Option<u8> = None;
        let mut cur = self.active;
        while let Some(c) = cur {
            if c == idx {
                match prev {
                    Some(p) => self.slots[p as usize].next = next,
                    None => self.active = next,
                }
                return;
            }
            prev = Some(c);
            cur = self.slots[c as usize].next;
        }
    }

    fn retire(&mut self, i: usize) {
        let slot = &mut self.slots[i];
        slot.live = false;
        slot.gen = slot.gen.wrapping_add(1);
        slot.remaining = 0;
        slot.action = None;
        slot.next = None;
    }
}

/// Register a one-shot timer that runs `callback(arg)` after `ticks`
/// system ticks. The callback runs from tick-handler context and must
/// not block.
///
/// # Returns
/// * `Ok(TimerRef)` - Handle for a later [`os_timer_cancel`]
/// * `Err(KernelError::InvalidParam)` - `ticks` was zero
/// * `Err(KernelError::NoFreeTimer)` - Timer arena exhausted
pub fn os_timer_register(
    ticks: Tick,
    callback: TimerCallback,
    arg: usize,
) -> KernelResult<TimerRef> {
    critical_section(|cs| {
        kernel::ctx(cs)
            .timers
            .register(ticks, TimerAction::App { cb: callback, arg })
    })
}

/// Cancel a registered timer before it fires
///
/// # Returns
/// * `Ok(())` - Timer disarmed
/// * `Err(KernelError::NotFound)` - Handle is stale or already fired
pub fn os_timer_cancel(timer: TimerRef) -> KernelResult<()> {
    critical_section(|cs| kernel::ctx(cs).timers.cancel(timer))
}

/// Delay the calling task for `ticks` system ticks
///
/// The task leaves the running state and is woken by the tick handler
/// once the delay expires.
///
/// # Returns
/// * `Ok(())` - Delay completed
/// * `Err(KernelError::InvalidParam)` - `ticks` was zero
/// * `Err(KernelError::InvalidContext)` - Called outside task context
/// * `Err(KernelError::NoFreeTimer)` - Timer arena exhausted
pub fn os_time_dly(ticks: Tick) -> KernelResult<()> {
    if ticks == 0 {
        return Err(KernelError::InvalidParam);
    }

    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let cur = kernel::running_task(k)?;
        // register before touching task state, so a full arena leaves
        // the caller running
        let timer = k.timers.register(ticks, TimerAction::Delay { task: cur })?;
        let tcb = k.tasks.get_mut(cur);
        tcb.state = TaskState::Delayed;
        tcb.wake_status = WakeStatus::Pending;
        tcb.timeout_timer = Some(timer);
        Ok(())
    })?;

    sched::os_sched(false);
    Ok(())
}

/// Get the current system tick count
#[inline]
pub fn os_time_get() -> Tick {
    kernel::KERNEL.tick_get()
}

/// Overwrite the system tick count
#[inline]
pub fn os_time_set(ticks: Tick) {
    kernel::KERNEL.tick_set(ticks);
}

/// System tick handler
///
/// Drives wall time and the timer arena, then runs the tick-level
/// preemption check on the way out of interrupt context. Call this
/// once per tick interrupt; tests call it directly to simulate time.
pub fn os_tick_handler() {
    if !kernel::KERNEL.is_started() {
        return;
    }

    kernel::os_int_enter();
    kernel::KERNEL.tick_increment();
    process_timers();
    kernel::os_int_exit(true);
}

/// Two-phase expiry: collect and retire due timers inside the critical
/// section, run their actions outside it. An action is free to register
/// new timers without deadlocking or corrupting the scan.
fn process_timers() {
    let mut due: [Option<TimerAction>; CFG_MAX_TIMERS] = [None; CFG_MAX_TIMERS];
    let n = critical_section(|cs| kernel::ctx(cs).timers.advance(&mut due));
    for action in due.iter().take(n).flatten() {
        dispatch(*action);
    }
}

fn dispatch(action: TimerAction) {
    match action {
        TimerAction::Delay { task } => delay_expired(task),
        #[cfg(feature = "sem")]
        TimerAction::SemTimeout { task, sem } => crate::sync::sem::timeout_expired(task, sem),
        #[cfg(feature = "queue")]
        TimerAction::QueuePutTimeout { task, queue } => {
            crate::sync::queue::put_timeout_expired(task, queue)
        }
        #[cfg(feature = "queue")]
        TimerAction::QueueGetTimeout { task, queue } => {
            crate::sync::queue::get_timeout_expired(task, queue)
        }
        TimerAction::App { cb, arg } => cb(arg),
    }
}

/// Delay expiry action: put the task back onto the ready queue. Any
/// preemption it causes is settled by the interrupt-exit scheduling
/// pass, not here.
fn delay_expired(task: TaskId) {
    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let tcb = k.tasks.get_mut(task);
        if tcb.state != TaskState::Delayed {
            return;
        }
        tcb.state = TaskState::Ready;
        tcb.wake_status = WakeStatus::Success;
        tcb.timeout_timer = None;
        let enq = k.ready.enqueue(&mut k.tasks, task);
        debug_assert!(enq.is_ok());
    });
}

/// SysTick interrupt handler
#[no_mangle]
pub extern "C" fn SysTick() {
    os_tick_handler();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_arg: usize) {}

    fn app(arg: usize) -> TimerAction {
        TimerAction::App { cb: noop, arg }
    }

    fn advance(pool: &mut TimerPool) -> (usize, [Option<TimerAction>; CFG_MAX_TIMERS]) {
        let mut due = [None; CFG_MAX_TIMERS];
        let n = pool.advance(&mut due);
        (n, due)
    }

    #[test]
    fn test_zero_tick_registration_rejected() {
        let mut pool = TimerPool::new();
        assert_eq!(
            pool.register(0, app(0)).unwrap_err(),
            KernelError::InvalidParam
        );
    }

    #[test]
    fn test_fires_after_exact_tick_count() {
        let mut pool = TimerPool::new();
        pool.register(3, app(7)).unwrap();

        assert_eq!(advance(&mut pool).0, 0);
        assert_eq!(advance(&mut pool).0, 0);
        let (n, due) = advance(&mut pool);
        assert_eq!(n, 1);
        assert!(matches!(due[0], Some(TimerAction::App { arg: 7, .. })));
        // one-shot: nothing further
        assert_eq!(advance(&mut pool).0, 0);
    }

    #[test]
    fn test_several_due_in_one_tick() {
        let mut pool = TimerPool::new();
        pool.register(1, app(1)).unwrap();
        pool.register(2, app(2)).unwrap();
        pool.register(1, app(3)).unwrap();

        let (n, _) = advance(&mut pool);
        assert_eq!(n, 2);
        let (n, due) = advance(&mut pool);
        assert_eq!(n, 1);
        assert!(matches!(due[0], Some(TimerAction::App { arg: 2, .. })));
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut pool = TimerPool::new();
        let keep = pool.register(2, app(1)).unwrap();
        let drop = pool.register(2, app(2)).unwrap();
        pool.cancel(drop).unwrap();

        advance(&mut pool);
        let (n, due) = advance(&mut pool);
        assert_eq!(n, 1);
        assert!(matches!(due[0], Some(TimerAction::App { arg: 1, .. })));
        // the surviving handle is now stale too
        assert_eq!(pool.cancel(keep).unwrap_err(), KernelError::NotFound);
    }

    #[test]
    fn test_recycled_slot_rejects_old_handle() {
        let mut pool = TimerPool::new();
        let old = pool.register(1, app(1)).unwrap();
        pool.cancel(old).unwrap();
        let new = pool.register(5, app(2)).unwrap();

        assert_eq!(old.idx, new.idx);
        assert_ne!(old.gen, new.gen);
        assert_eq!(pool.cancel(old).unwrap_err(), KernelError::NotFound);
        pool.cancel(new).unwrap();
    }

    #[test]
    fn test_exhaustion_reports_no_free_timer() {
        let mut pool = TimerPool::new();
        for _ in 0..CFG_MAX_TIMERS {
            pool.register(10, app(0)).unwrap();
        }
        assert_eq!(
            pool.register(10, app(0)).unwrap_err(),
            KernelError::NoFreeTimer
        );
    }

    #[test]
    fn test_reset_invalidates_live_handles() {
        let mut pool = TimerPool::new();
        let timer = pool.register(4, app(0)).unwrap();
        pool.reset();
        assert_eq!(pool.cancel(timer).unwrap_err(), KernelError::NotFound);
        assert_eq!(advance(&mut pool).0, 0);
    }
}
