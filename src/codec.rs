use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::envelope::Envelope;
use crate::error::ImqError;

/// Wire codec for packed envelopes.
///
/// `Plain` is UTF-8 JSON; `Gzip` wraps the same JSON in gzip. Producers and
/// consumers must agree on the mode: unpacking bytes produced by the other
/// mode is a decode error, not a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Codec {
    Plain,
    Gzip,
}

impl Codec {
    pub(crate) fn from_use_gzip(use_gzip: bool) -> Self {
        if use_gzip { Codec::Gzip } else { Codec::Plain }
    }

    pub(crate) async fn pack(&self, envelope: &Envelope) -> Result<Vec<u8>, ImqError> {
        let json = serde_json::to_vec(envelope)?;
        match self {
            Codec::Plain => Ok(json),
            Codec::Gzip => {
                let mut encoder = GzipEncoder::new(Vec::new());
                encoder.write_all(&json).await?;
                encoder.shutdown().await?;
                Ok(encoder.into_inner())
            }
        }
    }

    pub(crate) async fn unpack(&self, data: &[u8]) -> Result<Envelope, ImqError> {
        match self {
            Codec::Plain => Ok(serde_json::from_slice(data)?),
            Codec::Gzip => {
                let mut decoder = GzipDecoder::new(data);
                let mut json = Vec::new();
                decoder
                    .read_to_end(&mut json)
                    .await
                    .map_err(|e| ImqError::Codec(format!("gunzip failed: {e}")))?;
                Ok(serde_json::from_slice(&json)?)
            }
        }
    }
}
