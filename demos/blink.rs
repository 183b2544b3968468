//! Blink demo - two equal-priority tasks over a binary semaphore
//!
//! The blink task toggles an LED on a half-second cadence and signals
//! every completed cycle; the watcher task counts the cycles. Both run
//! at the same priority, so the tick-level scheduler rotates them.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

use core::sync::atomic::{AtomicU32, Ordering};

use ertos::os_task_create;
use ertos::sem::Semaphore;
use ertos::time::os_time_dly;
use ertos::types::{StkElement, Timeout};

// ============ Task Storage ============

static mut BLINK_STK: [StkElement; 512] = [0; 512];
static mut WATCH_STK: [StkElement; 512] = [0; 512];

static CYCLES: AtomicU32 = AtomicU32::new(0);
static mut CYCLE_SEM: Option<Semaphore> = None;

fn cycle_sem() -> Semaphore {
    unsafe { (*(&raw const CYCLE_SEM)).expect("demo_init ran first") }
}

// ============ LED Control ============
// Board specific; wire these to a real GPIO pin.

fn led_on() {
    ertos::info!("LED ON");
}

fn led_off() {
    ertos::info!("LED OFF");
}

// ============ Tasks ============

fn blink_task(_arg: usize) -> ! {
    ertos::info!("blink task started");
    loop {
        led_on();
        let _ = os_time_dly(500);
        led_off();
        let _ = os_time_dly(500);
        let _ = cycle_sem().give();
    }
}

fn watch_task(_arg: usize) -> ! {
    ertos::info!("watch task started");
    loop {
        if cycle_sem().take(Timeout::Forever).is_ok() {
            CYCLES.fetch_add(1, Ordering::Relaxed);
            ertos::info!("cycle #{}", CYCLES.load(Ordering::Relaxed));
        }
    }
}

// ============ Main ============

fn demo_init() {
    ertos::os_init().expect("OS init failed");

    let sem = Semaphore::binary(false).expect("sem create failed");
    unsafe { *(&raw mut CYCLE_SEM) = Some(sem) };

    os_task_create(
        unsafe { &mut *(&raw mut BLINK_STK) },
        "Blink",
        1,
        blink_task,
        0,
        10,
    )
    .expect("blink task failed");

    os_task_create(
        unsafe { &mut *(&raw mut WATCH_STK) },
        "Watch",
        2,
        watch_task,
        0,
        10,
    )
    .expect("watch task failed");
}

#[cfg(target_arch = "arm")]
#[cortex_m_rt::entry]
fn main() -> ! {
    demo_init();
    ertos::info!("Starting RTOS");
    ertos::os_start().expect("OS start failed");

    loop {
        cortex_m::asm::nop();
    }
}

// Hosted build: the port stub declines the handoff, so os_start returns
#[cfg(not(target_arch = "arm"))]
fn main() {
    demo_init();
    ertos::os_start().expect("OS start failed");
}
