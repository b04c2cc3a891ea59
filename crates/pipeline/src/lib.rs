//! The warmprompt invocation pipeline.
//!
//! Every call follows the same fixed path:
//!
//! 1. **Validate** the request (`message` must be non-empty)
//! 2. **Aggregate** history, metadata and passages concurrently
//! 3. **Compose** the three-block prompt (static, dynamic, query)
//! 4. **Invoke** the adapter chosen at construction (local or remote)
//! 5. **Record** usage in the cache accountant
//!
//! A caller-level timeout covers steps 2 to 4. Usage is recorded only for
//! invocations that complete; a cancelled or failed call records nothing.

pub mod pipeline;
pub mod stream;

pub use pipeline::{PipelineResponse, ToolPipeline};
pub use stream::RecordingStream;
