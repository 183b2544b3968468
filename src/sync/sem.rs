//! Semaphore implementation
//!
//! One arena-backed primitive covers counting semaphores, binary
//! semaphores, and recursive mutexes; the `kind` field switches the
//! behavior. Application code holds copyable [`Semaphore`] handles that
//! are validated against a generation counter, so operations on a
//! deleted semaphore fail instead of touching a recycled slot.
//!
//! The count is signed: positive values are available units, and for a
//! mutex the negative range counts recursive acquisitions by the owner.

use crate::config::CFG_MAX_SEMS;
use crate::critical::critical_section;
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::sched::{self, TaskQueue};
use crate::time::TimerAction;
use crate::types::{ObjRef, PendOn, TaskId, TaskState, Timeout, WakeStatus};

/// Largest count a counting semaphore can hold
pub const SEM_COUNT_MAX: i8 = 127;
/// Deepest mutex recursion; one more take fails
pub const SEM_COUNT_MIN: i8 = -127;

/// Behavioral variant of a semaphore slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemKind {
    Counting,
    Binary,
    Mutex,
}

#[derive(Debug)]
pub(crate) struct SemSlot {
    live: bool,
    gen: u16,
    kind: SemKind,
    count: i8,
    /// Mutex owner; `None` for the other kinds and for a free mutex
    owner: Option<TaskId>,
    waiters: TaskQueue,
}

impl SemSlot {
    const fn new() -> Self {
        SemSlot {
            live: false,
            gen: 0,
            kind: SemKind::Counting,
            count: 0,
            owner: None,
            waiters: TaskQueue::new(),
        }
    }
}

const SEM_INIT: SemSlot = SemSlot::new();

/// Fixed arena of semaphore slots
pub(crate) struct SemPool {
    slots: [SemSlot; CFG_MAX_SEMS],
}

impl SemPool {
    pub const fn new() -> Self {
        SemPool {
            slots: [SEM_INIT; CFG_MAX_SEMS],
        }
    }

    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            let gen = slot.gen.wrapping_add(slot.live as u16);
            *slot = SemSlot::new();
            slot.gen = gen;
        }
    }

    fn alloc(&mut self, kind: SemKind, count: i8) -> KernelResult<ObjRef> {
        let Some(idx) = self.slots.iter().position(|s| !s.live) else {
            return Err(KernelError::NoFreeSem);
        };
        let slot = &mut self.slots[idx];
        debug_assert!(slot.waiters.is_empty());
        slot.live = true;
        slot.kind = kind;
        slot.count = count;
        slot.owner = None;
        Ok(ObjRef {
            idx: idx as u8,
            gen: slot.gen,
        })
    }

    /// Resolve a handle, refusing stale generations
    fn lookup(&mut self, r: ObjRef) -> KernelResult<&mut SemSlot> {
        let slot = &mut self.slots[r.idx as usize];
        if !slot.live || slot.gen != r.gen {
            return Err(KernelError::Deleted);
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, idx: u8) -> &mut SemSlot {
        &mut self.slots[idx as usize]
    }

    fn retire(&mut self, idx: u8) {
        let slot = &mut self.slots[idx as usize];
        debug_assert!(slot.waiters.is_empty());
        slot.live = false;
        slot.gen = slot.gen.wrapping_add(1);
        slot.count = 0;
        slot.owner = None;
    }
}

/// Whether a take must block: no units for the plain kinds, a foreign
/// owner for a mutex
fn must_block(slot: &SemSlot, cur: TaskId) -> bool {
    match slot.kind {
        SemKind::Mutex => slot.owner.is_some() && slot.owner != Some(cur),
        _ => slot.count == 0,
    }
}

/// Copyable handle to an arena semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore(pub(crate) ObjRef);

impl Semaphore {
    fn create(kind: SemKind, count: i8) -> KernelResult<Semaphore> {
        if !kernel::KERNEL.is_initialized() {
            return Err(KernelError::NotInit);
        }
        critical_section(|cs| kernel::ctx(cs).sems.alloc(kind, count)).map(Semaphore)
    }

    /// Create a counting semaphore holding `initial` units
    ///
    /// # Returns
    /// * `Err(KernelError::InvalidParam)` - `initial` exceeds [`SEM_COUNT_MAX`]
    /// * `Err(KernelError::NoFreeSem)` - Arena exhausted
    pub fn counting(initial: u8) -> KernelResult<Semaphore> {
        if initial > SEM_COUNT_MAX as u8 {
            return Err(KernelError::InvalidParam);
        }
        Self::create(SemKind::Counting, initial as i8)
    }

    /// Create a binary semaphore, initially available or not
    pub fn binary(available: bool) -> KernelResult<Semaphore> {
        Self::create(SemKind::Binary, available as i8)
    }

    /// Create a recursive mutex, initially free
    pub fn mutex() -> KernelResult<Semaphore> {
        Self::create(SemKind::Mutex, 1)
    }

    /// Take one unit, blocking per `timeout` if none is available
    ///
    /// For a mutex the caller becomes (or already is) the owner;
    /// recursive takes are counted and must be matched by gives.
    ///
    /// # Returns
    /// * `Err(KernelError::WouldBlock)` - `NoWait` and unavailable
    /// * `Err(KernelError::Timeout)` - Bounded wait elapsed
    /// * `Err(KernelError::Deleted)` - Handle stale, or deleted while waiting
    /// * `Err(KernelError::RecursionOverflow)` - Mutex recursion bound hit
    /// * `Err(KernelError::InvalidContext)` - Not called from a task
    /// * `Err(KernelError::InvalidParam)` - `Ticks(0)` timeout
    pub fn take(&self, timeout: Timeout) -> KernelResult<()> {
        let ticks = match timeout {
            Timeout::Ticks(0) => return Err(KernelError::InvalidParam),
            Timeout::Ticks(n) => Some(n),
            Timeout::Forever | Timeout::NoWait => None,
        };

        let blocked = critical_section(|cs| {
            let k = kernel::ctx(cs);
            let cur = kernel::running_task(k)?;
            let slot = k.sems.lookup(self.0)?;

            if !must_block(slot, cur) {
                match slot.kind {
                    SemKind::Mutex if slot.owner == Some(cur) => {
                        if slot.count <= SEM_COUNT_MIN {
                            return Err(KernelError::RecursionOverflow);
                        }
                        slot.count -= 1;
                    }
                    SemKind::Mutex => {
                        slot.owner = Some(cur);
                        slot.count -= 1;
                    }
                    _ => slot.count -= 1,
                }
                return Ok(None);
            }

            if matches!(timeout, Timeout::NoWait) {
                return Err(KernelError::WouldBlock);
            }

            let tcb = k.tasks.get_mut(cur);
            tcb.state = TaskState::Pended;
            tcb.wake_status = WakeStatus::Pending;
            tcb.pend_on = PendOn::Sem(self.0.idx);
            let enq = slot.waiters.enqueue(&mut k.tasks, cur);
            debug_assert!(enq.is_ok());

            if let Some(n) = ticks {
                let action = TimerAction::SemTimeout {
                    task: cur,
                    sem: self.0,
                };
                match k.timers.register(n, action) {
                    Ok(timer) => k.tasks.get_mut(cur).timeout_timer = Some(timer),
                    Err(e) => {
                        // unwind the block so the caller keeps running
                        let slot = k.sems.lookup(self.0)?;
                        slot.waiters.remove(&mut k.tasks, cur);
                        let tcb = k.tasks.get_mut(cur);
                        tcb.state = TaskState::Running;
                        tcb.pend_on = PendOn::Nothing;
                        return Err(e);
                    }
                }
            }
            Ok(Some(cur))
        })?;

        let Some(id) = blocked else {
            return Ok(());
        };

        sched::os_sched(false);

        critical_section(|cs| {
            let k = kernel::ctx(cs);
            match k.tasks.get(id).wake_status {
                WakeStatus::Success => Ok(()),
                WakeStatus::Timeout => Err(KernelError::Timeout),
                WakeStatus::Deleted => Err(KernelError::Deleted),
                // no switch happened (hosted stub port): the wait
                // stands, the caller just does not hold a unit
                WakeStatus::Pending => Err(KernelError::WouldBlock),
            }
        })
    }

    /// Give one unit back, waking the most urgent waiter if one exists
    ///
    /// Safe from interrupt handlers; the scheduling pass is left to the
    /// interrupt exit path there.
    ///
    /// # Returns
    /// * `Err(KernelError::CountOverflow)` - Counting semaphore at max
    /// * `Err(KernelError::BinaryOverflow)` - Binary give while available
    /// * `Err(KernelError::NotOwner)` - Mutex give by anyone but the owner
    /// * `Err(KernelError::Deleted)` - Handle stale
    pub fn give(&self) -> KernelResult<()> {
        let woke = critical_section(|cs| {
            let k = kernel::ctx(cs);
            let giver = if kernel::KERNEL.int_nesting() == 0 {
                k.current
            } else {
                None
            };
            let slot = k.sems.lookup(self.0)?;

            let woken = match slot.kind {
                SemKind::Mutex => {
                    let Some(giver) = giver else {
                        return Err(KernelError::NotOwner);
                    };
                    if slot.owner != Some(giver) {
                        return Err(KernelError::NotOwner);
                    }
                    if slot.count < 0 {
                        // unwind one level of recursion
                        slot.count += 1;
                        None
                    } else if let Some(w) = slot.waiters.dequeue_head(&mut k.tasks) {
                        // hand the lock straight to the next owner
                        slot.owner = Some(w);
                        Some(w)
                    } else {
                        slot.count = 1;
                        slot.owner = None;
                        None
                    }
                }
                SemKind::Counting => {
                    if slot.count == 0 {
                        match slot.waiters.dequeue_head(&mut k.tasks) {
                            Some(w) => Some(w),
                            None => {
                                slot.count = 1;
                                None
                            }
                        }
                    } else {
                        if slot.count >= SEM_COUNT_MAX {
                            return Err(KernelError::CountOverflow);
                        }
                        slot.count += 1;
                        None
                    }
                }
                SemKind::Binary => {
                    if slot.count != 0 {
                        return Err(KernelError::BinaryOverflow);
                    }
                    match slot.waiters.dequeue_head(&mut k.tasks) {
                        Some(w) => Some(w),
                        None => {
                            slot.count = 1;
                            None
                        }
                    }
                }
            };

            if let Some(w) = woken {
                kernel::wake_task(k, w, WakeStatus::Success);
            }
            Ok(woken.is_some())
        })?;

        if woke && kernel::KERNEL.int_nesting() == 0 {
            sched::os_sched(false);
        }
        Ok(())
    }

    /// Delete the semaphore, evicting every waiter
    ///
    /// Each waiter wakes with the deleted status; the slot is retired so
    /// all outstanding handles turn stale.
    pub fn delete(&self) -> KernelResult<()> {
        let woke_any = critical_section(|cs| {
            let k = kernel::ctx(cs);
            k.sems.lookup(self.0)?;

            let mut woke = false;
            while let Some(w) = k.sems.slot_mut(self.0.idx).waiters.dequeue_head(&mut k.tasks)
            {
                kernel::wake_task(k, w, WakeStatus::Deleted);
                woke = true;
            }
            k.sems.retire(self.0.idx);
            Ok(woke)
        })?;

        if woke_any && kernel::KERNEL.int_nesting() == 0 {
            sched::os_sched(false);
        }
        Ok(())
    }

    /// Overwrite the count of an idle counting or binary semaphore
    ///
    /// # Returns
    /// * `Err(KernelError::InvalidState)` - Tasks are waiting, or the
    ///   handle is a mutex
    /// * `Err(KernelError::InvalidParam)` - Count out of range for the kind
    pub fn reset(&self, count: u8) -> KernelResult<()> {
        critical_section(|cs| {
            let k = kernel::ctx(cs);
            let slot = k.sems.lookup(self.0)?;
            if !slot.waiters.is_empty() {
                return Err(KernelError::InvalidState);
            }
            match slot.kind {
                SemKind::Mutex => return Err(KernelError::InvalidState),
                SemKind::Counting if count <= SEM_COUNT_MAX as u8 => slot.count = count as i8,
                SemKind::Binary if count <= 1 => slot.count = count as i8,
                _ => return Err(KernelError::InvalidParam),
            }
            Ok(())
        })
    }

    /// Current count; negative values are mutex recursion depth
    pub fn count(&self) -> KernelResult<i8> {
        critical_section(|cs| kernel::ctx(cs).sems.lookup(self.0).map(|s| s.count))
    }
}

/// Timeout action for a semaphore wait. The give path may have won the
/// race already, in which case there is nothing left to do.
pub(crate) fn timeout_expired(task: TaskId, sem: ObjRef) {
    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let Ok(slot) = k.sems.lookup(sem) else {
            return;
        };
        if !slot.waiters.remove(&mut k.tasks, task) {
            return;
        }
        kernel::wake_task(k, task, WakeStatus::Timeout);
    });
    // no scheduling pass here; interrupt exit runs one
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TcbPool;

    #[test]
    fn test_alloc_and_retire_cycle_generations() {
        let mut pool = SemPool::new();
        let old = pool.alloc(SemKind::Counting, 3).unwrap();
        assert_eq!(pool.lookup(old).unwrap().count, 3);

        pool.retire(old.idx);
        assert_eq!(pool.lookup(old).unwrap_err(), KernelError::Deleted);

        let new = pool.alloc(SemKind::Binary, 1).unwrap();
        assert_eq!(new.idx, old.idx);
        assert!(pool.lookup(old).is_err());
        assert!(pool.lookup(new).is_ok());
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = SemPool::new();
        for _ in 0..CFG_MAX_SEMS {
            pool.alloc(SemKind::Counting, 0).unwrap();
        }
        assert_eq!(
            pool.alloc(SemKind::Counting, 0).unwrap_err(),
            KernelError::NoFreeSem
        );
    }

    #[test]
    fn test_reset_invalidates_all_slots() {
        let mut pool = SemPool::new();
        let a = pool.alloc(SemKind::Counting, 1).unwrap();
        let b = pool.alloc(SemKind::Mutex, 1).unwrap();
        pool.reset();
        assert!(pool.lookup(a).is_err());
        assert!(pool.lookup(b).is_err());
    }

    #[test]
    fn test_blocking_condition_per_kind() {
        let mut tasks = TcbPool::new();
        let me = tasks.alloc().unwrap();
        let other = tasks.alloc().unwrap();

        let mut slot = SemSlot::new();
        slot.kind = SemKind::Counting;
        slot.count = 0;
        assert!(must_block(&slot, me));
        slot.count = 2;
        assert!(!must_block(&slot, me));

        // a mutex blocks on ownership, not on count
        slot.kind = SemKind::Mutex;
        slot.count = 0;
        slot.owner = None;
        assert!(!must_block(&slot, me));
        slot.owner = Some(me);
        assert!(!must_block(&slot, me));
        slot.owner = Some(other);
        assert!(must_block(&slot, me));
    }
}
