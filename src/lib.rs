pub mod analysis;
pub mod streaming;

pub use analysis::{Analyzer, BandPowerAnalyzer, DeviceProfile};
pub use streaming::{
    ChannelSchema, Consumer, ConsumerHandle, Pipeline, PipelineConfig, Producer, RunLimit,
    SampleEnvelope, Source, StreamError, StreamResult, WindowBuffer,
};
