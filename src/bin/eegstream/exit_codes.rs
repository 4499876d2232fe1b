use eegstream::StreamError;

pub const SUCCESS: i32 = 0;
pub const INPUT_ERROR: i32 = 2;
pub const ACQUISITION_FAILURE: i32 = 3;
pub const STREAM_INTERRUPTED: i32 = 4;
pub const EXECUTION_ERROR: i32 = 5;

/// Map a pipeline failure to the process exit code
pub fn for_error(error: &StreamError) -> i32 {
    match error.root_cause() {
        StreamError::AcquisitionFailure(_) => ACQUISITION_FAILURE,
        StreamError::StreamInterrupted(_) => STREAM_INTERRUPTED,
        StreamError::InvalidConfig(_)
        | StreamError::DestinationExists(_)
        | StreamError::SchemaMismatch(_) => INPUT_ERROR,
        _ => EXECUTION_ERROR,
    }
}
