//! Source media-manager construction.

use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::network::Stream;
use crate::session::SourceMediaManager;
use crate::video::H264Encoder;
use crate::video::testsource::{TestBufferProducer, TestCodecSource};

/// Selects the capture+encoder flavor; defaults to `test`.
pub const SOURCE_TYPE_ENV: &str = "AETHERCAST_SOURCE_TYPE";

/// Builds a [`SourceMediaManager`] wired with the flavor selected by
/// [`SOURCE_TYPE_ENV`].
///
/// Platform capture/codec backends live outside this crate; the only
/// built-in flavor is `test`, which streams a synthetic bitstream and
/// is also the default. Unknown flavors are an error rather than a
/// silent fallback.
pub struct MediaManagerFactory;

impl MediaManagerFactory {
    pub fn create_source(
        remote_address: IpAddr,
        stream: Box<dyn Stream>,
    ) -> Result<Arc<SourceMediaManager>> {
        let flavor =
            std::env::var(SOURCE_TYPE_ENV).unwrap_or_else(|_| "test".to_string());

        tracing::debug!(flavor = %flavor, %remote_address, "creating source media manager");

        match flavor.as_str() {
            "test" => {
                let producer = TestBufferProducer::new();
                let encoder = H264Encoder::new(TestCodecSource::new());
                Ok(SourceMediaManager::new(
                    remote_address,
                    producer,
                    encoder,
                    stream,
                ))
            }
            other => {
                tracing::error!(flavor = other, "unknown source type");
                Err(Error::ConfigureRejected("unknown source type"))
            }
        }
    }
}
