pub mod profiles;
pub mod record;
pub mod run;

use eegstream::Pipeline;

/// Cancel the pipeline on Ctrl-C
pub fn stop_on_ctrl_c(pipeline: &Pipeline) {
    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, stopping pipeline");
            token.cancel();
        }
    });
}
