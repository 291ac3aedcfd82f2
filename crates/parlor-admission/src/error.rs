//! Error types for the admission layer.

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// Eight consecutive draws all collided with live shortcodes. The
    /// code space is effectively saturated; the caller should shed load
    /// rather than spin.
    #[error("shortcode space exhausted after {0} attempts")]
    CodesExhausted(u32),

    /// The admission queue is at its configured depth.
    #[error("admission queue is full ({0} rooms waiting)")]
    QueueFull(usize),
}
