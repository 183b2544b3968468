//! Producer-Consumer demo over a two-entry message queue
//!
//! The producer runs at the lower priority and fills the queue with
//! sequence numbers; the consumer preempts it as soon as a message
//! lands, so the queue normally stays shallow.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

use core::sync::atomic::{AtomicU32, Ordering};

use ertos::os_task_create;
use ertos::queue::MsgQueue;
use ertos::time::os_time_dly;
use ertos::types::{StkElement, Timeout};

const MSG_SIZE: usize = 4;
const QUEUE_DEPTH: usize = 2;

// ============ Task Storage ============

static mut PRODUCER_STK: [StkElement; 256] = [0; 256];
static mut CONSUMER_STK: [StkElement; 256] = [0; 256];
static mut QUEUE_BUF: [u8; MSG_SIZE * QUEUE_DEPTH] = [0; MSG_SIZE * QUEUE_DEPTH];

static PRODUCED: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);

static mut QUEUE: Option<MsgQueue> = None;

fn queue() -> MsgQueue {
    unsafe { (*(&raw const QUEUE)).expect("demo_init ran first") }
}

// ============ Tasks ============

fn producer_task(_arg: usize) -> ! {
    loop {
        let n = PRODUCED.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = queue().give(&n.to_le_bytes(), Timeout::Forever);
        ertos::info!("[P] produced #{}", n);
        let _ = os_time_dly(200);
    }
}

fn consumer_task(_arg: usize) -> ! {
    let mut msg = [0u8; MSG_SIZE];
    loop {
        if queue().take(&mut msg, Timeout::Forever).is_ok() {
            CONSUMED.fetch_add(1, Ordering::Relaxed);
            ertos::info!("[C] consumed #{}", u32::from_le_bytes(msg));
        }
    }
}

// ============ Main ============

fn demo_init() {
    ertos::os_init().expect("OS init failed");

    let q = MsgQueue::create(
        unsafe { &mut *(&raw mut QUEUE_BUF) },
        MSG_SIZE,
        QUEUE_DEPTH,
    )
    .expect("queue create failed");
    unsafe { *(&raw mut QUEUE) = Some(q) };

    os_task_create(
        unsafe { &mut *(&raw mut PRODUCER_STK) },
        "P",
        1,
        producer_task,
        0,
        10,
    )
    .expect("producer task failed");

    os_task_create(
        unsafe { &mut *(&raw mut CONSUMER_STK) },
        "C",
        2,
        consumer_task,
        0,
        9,
    )
    .expect("consumer task failed");
}

#[cfg(target_arch = "arm")]
#[cortex_m_rt::entry]
fn main() -> ! {
    demo_init();
    ertos::info!("Starting...");
    ertos::os_start().expect("OS start failed");

    loop {
        cortex_m::asm::wfi();
    }
}

// Hosted build: the port stub declines the handoff, so os_start returns
#[cfg(not(target_arch = "arm"))]
fn main() {
    demo_init();
    ertos::os_start().expect("OS start failed");
}
