//! Upload metrics.
//!
//! Counters are emitted through the `metrics` facade.  The library installs
//! no recorder; an embedding application that wants them installs its own
//! exporter and calls [`describe_metrics`] once.

use metrics::describe_counter;

// -- Metric name constants ----------------------------------------------------

/// Objects written with a single put (counter).
pub const SINGLE_PUTS_TOTAL: &str = "filer_single_puts_total";

/// Multipart chunks uploaded successfully (counter).
pub const PARTS_UPLOADED_TOTAL: &str = "filer_parts_uploaded_total";

/// Bytes carried by successfully uploaded chunks (counter).
pub const PART_BYTES_TOTAL: &str = "filer_part_bytes_total";

/// Multipart chunks that failed or were lost (counter).
pub const PARTS_FAILED_TOTAL: &str = "filer_parts_failed_total";

/// Multipart uploads completed (counter).
pub const MULTIPART_COMPLETIONS_TOTAL: &str = "filer_multipart_completions_total";

/// Multipart uploads aborted after a failure (counter).
pub const MULTIPART_ABORTS_TOTAL: &str = "filer_multipart_aborts_total";

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(SINGLE_PUTS_TOTAL, "Objects written with a single put");
    describe_counter!(PARTS_UPLOADED_TOTAL, "Multipart chunks uploaded");
    describe_counter!(PART_BYTES_TOTAL, "Bytes uploaded as multipart chunks");
    describe_counter!(PARTS_FAILED_TOTAL, "Multipart chunks that failed");
    describe_counter!(MULTIPART_COMPLETIONS_TOTAL, "Multipart uploads completed");
    describe_counter!(MULTIPART_ABORTS_TOTAL, "Multipart uploads aborted");
}
