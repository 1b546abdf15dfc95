//! Producer epoch/sequence state machine.
//!
//! Pure validation, computed before any mutation of stream state: a request
//! is only ever committed on `Accepted`.

use crate::types::{ProducerOutcome, ProducerState};

/// Validate a producer's `(epoch, seq)` against its prior state, if any.
pub fn validate(prior: Option<&ProducerState>, epoch: u64, seq: u64) -> ProducerOutcome {
    match prior {
        None => {
            if seq == 0 {
                ProducerOutcome::Accepted
            } else {
                ProducerOutcome::SequenceGap {
                    expected_seq: 0,
                    received_seq: seq,
                }
            }
        }
        Some(state) => {
            if epoch < state.epoch {
                ProducerOutcome::StaleEpoch {
                    current_epoch: state.epoch,
                }
            } else if epoch > state.epoch {
                if seq == 0 {
                    ProducerOutcome::Accepted
                } else {
                    ProducerOutcome::InvalidEpochSeq
                }
            } else if seq <= state.last_seq {
                ProducerOutcome::Duplicate {
                    last_seq: state.last_seq,
                }
            } else if seq == state.last_seq + 1 {
                ProducerOutcome::Accepted
            } else {
                ProducerOutcome::SequenceGap {
                    expected_seq: state.last_seq + 1,
                    received_seq: seq,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(epoch: u64, last_seq: u64) -> ProducerState {
        ProducerState {
            epoch,
            last_seq,
            last_updated_ms: 0,
        }
    }

    #[test]
    fn unknown_producer_seq_zero_accepted() {
        assert_eq!(validate(None, 0, 0), ProducerOutcome::Accepted);
    }

    #[test]
    fn unknown_producer_seq_nonzero_gap() {
        assert_eq!(
            validate(None, 0, 3),
            ProducerOutcome::SequenceGap {
                expected_seq: 0,
                received_seq: 3
            }
        );
    }

    #[test]
    fn stale_epoch() {
        let s = state(2, 5);
        assert_eq!(
            validate(Some(&s), 1, 0),
            ProducerOutcome::StaleEpoch { current_epoch: 2 }
        );
    }

    #[test]
    fn higher_epoch_seq_zero_accepted() {
        let s = state(1, 5);
        assert_eq!(validate(Some(&s), 2, 0), ProducerOutcome::Accepted);
    }

    #[test]
    fn higher_epoch_seq_nonzero_invalid() {
        let s = state(1, 5);
        assert_eq!(validate(Some(&s), 2, 1), ProducerOutcome::InvalidEpochSeq);
    }

    #[test]
    fn same_epoch_duplicate() {
        let s = state(1, 5);
        assert_eq!(
            validate(Some(&s), 1, 5),
            ProducerOutcome::Duplicate { last_seq: 5 }
        );
        assert_eq!(
            validate(Some(&s), 1, 3),
            ProducerOutcome::Duplicate { last_seq: 5 }
        );
    }

    #[test]
    fn same_epoch_next_seq_accepted() {
        let s = state(1, 5);
        assert_eq!(validate(Some(&s), 1, 6), ProducerOutcome::Accepted);
    }

    #[test]
    fn same_epoch_gap() {
        let s = state(1, 5);
        assert_eq!(
            validate(Some(&s), 1, 8),
            ProducerOutcome::SequenceGap {
                expected_seq: 6,
                received_seq: 8
            }
        );
    }
}
