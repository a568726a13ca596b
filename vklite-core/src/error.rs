use thiserror::Error;

/// Error kinds shared by every layer of the substrate. Variants correspond
/// 1:1 to the `k*` status codes of the C original; here they are carried as
/// a `Result` instead of an out-parameter.
#[derive(Error, Debug)]
pub enum GfxError {
    /// Device, queue, or surface unavailable. Fatal when it occurs during
    /// app construction.
    #[error("initialization failed: {0}")]
    InitFailure(String),

    /// Operation requested on an object whose status is below `Created`.
    #[error("resource invalid (status below created)")]
    ResourceInvalid,

    /// Acquire or present returned `OUT_OF_DATE_KHR`.
    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    /// Acquire or present returned an unrecoverable error.
    #[error("swapchain invalid")]
    SwapchainInvalid,

    /// A host or device allocation, or a buffer resize, failed.
    #[error("out of memory")]
    Oom,

    /// A buffer/image copy or barrier submission failed.
    #[error("transfer failed: {0}")]
    TransferFailure(String),

    /// A FIFO configured with a hard capacity cap rejected an enqueue.
    #[error("queue full")]
    QueueFull,

    /// Emitted by the validation layer when present; callers may treat as
    /// non-fatal and just count occurrences.
    #[error("validation error: {0}")]
    Validation(String),

    /// `Container<T>` rejected an insert because its configured hard cap
    /// was reached.
    #[error("container full")]
    ContainerFull,

    /// A documented-unsupported combination of parameters was requested
    /// (e.g. `buffer_regions_resize` with `count > 1`).
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, GfxError>;
