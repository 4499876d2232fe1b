// Streaming pipeline engine
//
// Sources produce timestamped multi-channel envelopes at a target rate and
// broadcast them, in connection order, to their downstream consumers.
// Transforms are consumers that own their own downstream set; sinks are
// terminal consumers.
//
// Architecture:
// - `envelope`: The timestamped sample record and its persisted shape
// - `window_buffer`: Fixed-capacity rolling buffer used by windowing transforms
// - `graph`: Producer/Consumer capabilities and ordered fan-out
// - `source`: Paced production loop over pluggable acquisition back-ends
// - `transform`: Scaling, downsampling and periodic analysis
// - `sink`: File, console, UDP and HTTP delivery
// - `pipeline`: Running several sources as cancellable tasks with teardown
// - `config`: Declarative JSON pipeline description

pub mod config;
pub mod envelope;
pub mod graph;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod transform;
pub mod types;
pub mod window_buffer;

pub use config::{Edge, PipelineConfig, SinkEntry, SourceEntry, TransformEntry};
pub use envelope::{now_millis, ChannelSchema, PersistedRecord, SampleEnvelope};
pub use graph::{Consumer, ConsumerHandle, Downstream, Producer};
pub use pipeline::{Pipeline, PipelineEvent, PipelineStats};
pub use sink::{
    create_sink, ConsoleSink, FileFormat, FileSink, ForwardingPool, HttpPostSink, SinkConfig,
    UdpForwardSink,
};
pub use source::{
    create_acquisition, Acquired, Acquisition, ChannelDeviceAcquisition, CsvReplayAcquisition,
    DeviceEvent, DeviceHandle, JsonReplayAcquisition, MemoryAcquisition, RandomAcquisition,
    RunLimit, RunOutcome, RunSummary, SimulatedDeviceAcquisition, Source, SourceConfig,
    SourceMetadata, TcpDeviceAcquisition,
};
pub use transform::{
    create_transform, AnalysisFailurePolicy, DownsampleTransform, PeriodicAnalysisTransform,
    ScaleTransform, Transform, TransformConfig,
};
pub use types::{StreamError, StreamResult, StreamState};
pub use window_buffer::WindowBuffer;
