//! Hand-rolled DNS wire codec for tunneling arbitrary byte streams through
//! TXT-record queries and answers.
//!
//! This crate never reaches for a general-purpose DNS library: the wire
//! layout of the query/answer pair this protocol ever produces is fixed
//! and small, and a full resolver-grade parser would both pull in far more
//! than is needed and make it harder to guarantee byte-for-byte control
//! over the handful of fields (name compression, TXT chunking) this
//! protocol actually depends on.

mod downstream;
mod errors;
mod factory;
mod header;
mod name;
mod raw;
mod stream;
mod upstream;

pub use downstream::DownstreamCodec;
pub use errors::DnsProtoError;
pub use factory::{parse_answer, DnsPacketFactory};
pub use header::FragmentHeader;
pub use raw::{build_query, build_reply, parse_query, ParsedQuery};
pub use stream::{cmp_seq, DnsFragmentStream, FragmentCodec};
pub use upstream::UpstreamCodec;
