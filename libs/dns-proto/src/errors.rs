use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnsProtoError {
    #[error("message is truncated")]
    Truncated,
    #[error("label exceeds 63 bytes")]
    BadLabel,
    #[error("expected 1 question, got {0}")]
    UnexpectedQuestionCount(u16),
    #[error("expected 1 answer, got {0}")]
    UnexpectedAnswerCount(u16),
    #[error("unexpected qtype {0}, want TXT")]
    UnexpectedQtype(u16),
    #[error("unexpected qclass {0}, want IN")]
    UnexpectedQclass(u16),
    #[error("name does not end in the configured base domain")]
    WrongSuffix,
}
