//! Block header decoding, with an optional proof-of-authority compatibility mode.

use alloy_core::primitives::{B256, Bytes};
use alloy_rpc_types_eth::Header;

use crate::ChainError;

/// Maximum extraData length allowed by the yellow paper.
pub const MAX_EXTRA_DATA_LEN: usize = 32;

/// Chain identifiers whose clique consensus stuffs signer data into `extraData`.
///
/// 4 is Rinkeby, 5 is Goerli.
pub const PROOF_OF_AUTHORITY_CHAIN_IDS: &[u64] = &[4, 5];

/// How block headers returned by the endpoint are decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BlockHeaderAdapter {
    /// Reject headers whose extraData exceeds 32 bytes.
    #[default]
    Standard,
    /// Move the full extraData into `proof_of_authority_data`.
    ProofOfAuthority,
}

impl BlockHeaderAdapter {
    /// Pick the adapter required by a chain.
    pub fn for_chain(chain_id: u64) -> Self {
        if PROOF_OF_AUTHORITY_CHAIN_IDS.contains(&chain_id) {
            Self::ProofOfAuthority
        } else {
            Self::Standard
        }
    }

    /// Decode a header as returned by `eth_getBlockByNumber`.
    pub fn decode_header(&self, header: &Header) -> Result<BlockHeader, ChainError> {
        let extra_data = header.inner.extra_data.clone();

        let (extra_data, proof_of_authority_data) = match self {
            Self::Standard => {
                if extra_data.len() > MAX_EXTRA_DATA_LEN {
                    return Err(ChainError::ExtraDataLength {
                        len: extra_data.len(),
                    });
                }
                (extra_data, None)
            }
            Self::ProofOfAuthority => (Bytes::new(), Some(extra_data)),
        };

        Ok(BlockHeader {
            number: header.inner.number,
            hash: header.hash,
            timestamp: header.inner.timestamp,
            extra_data,
            proof_of_authority_data,
        })
    }
}

/// The subset of a block header the deployment run looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub extra_data: Bytes,
    /// Clique signer data, only populated by [`BlockHeaderAdapter::ProofOfAuthority`].
    pub proof_of_authority_data: Option<Bytes>,
}
