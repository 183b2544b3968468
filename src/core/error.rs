//! Error types for the kernel
//!
//! Every fallible operation returns a status synchronously; nothing
//! panics or aborts in the kernel itself.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum KernelError {
    /// No error
    None = 0,

    // ============ Parameter errors ============
    /// Invalid argument (zero length, out-of-range value, bad buffer)
    InvalidParam = 101,
    /// Priority out of range or reserved for the idle task
    InvalidPriority = 102,
    /// Stack region smaller than the configured minimum
    StackTooSmall = 103,
    /// Task name longer than the configured maximum
    NameTooLong = 104,

    // ============ Context / lifecycle-state errors ============
    /// Operation requires task context (not ISR, kernel started)
    InvalidContext = 201,
    /// Kernel has not been initialized
    NotInit = 202,
    /// Kernel is already running
    AlreadyStarted = 203,
    /// Task is not in a state that permits the operation
    InvalidState = 204,

    // ============ Resource errors ============
    /// TCB queue insertion failed, no state was changed
    EnqueueFailed = 301,
    /// TCB arena exhausted
    NoFreeTcb = 302,
    /// Timer arena exhausted
    NoFreeTimer = 303,
    /// Semaphore arena exhausted
    NoFreeSem = 304,
    /// Message queue arena exhausted
    NoFreeQueue = 305,

    // ============ Timer errors ============
    /// No such timer registration (already expired, cancelled, or stale)
    NotFound = 401,

    // ============ Blocking outcomes ============
    /// Unavailable and the caller asked not to block
    WouldBlock = 501,
    /// The timeout elapsed before the event arrived
    Timeout = 502,
    /// The object was deleted, or the handle is stale
    Deleted = 503,

    // ============ Saturation errors ============
    /// Counting semaphore at its representable maximum
    CountOverflow = 601,
    /// Binary semaphore given while already set
    BinaryOverflow = 602,
    /// Mutex recursion depth at its bound
    RecursionOverflow = 603,

    // ============ Ownership errors ============
    /// Mutex give by a task that does not own it
    NotOwner = 701,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == KernelError::None
    }

    #[inline]
    pub fn is_err(self) -> bool {
        self != KernelError::None
    }

    /// Stable numeric code of this error
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}
