//! Verification helpers for testing configuration passes
//!
//! Provides assertion helpers over the mutation log of
//! [`FakeNetControl`](crate::FakeNetControl).

use thiserror::Error;

use crate::fake_kernel::Mutation;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected mutation {expected} not found in {actual}")]
    MutationNotFound { expected: String, actual: String },

    #[error("Unexpected mutation {unexpected} found in {actual}")]
    UnexpectedMutation { unexpected: String, actual: String },

    #[error("Expected {expected} mutations matching {what}, found {actual}")]
    CountMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Mutation log verifier
pub struct MutationVerifier {
    mutations: Vec<Mutation>,
}

impl MutationVerifier {
    /// Create a new mutation verifier
    pub fn new(mutations: Vec<Mutation>) -> Self {
        Self { mutations }
    }

    /// Verify that a specific mutation was made
    pub fn assert_mutated(&self, expected: &Mutation) -> VerifyResult<()> {
        if self.mutations.contains(expected) {
            Ok(())
        } else {
            Err(VerificationError::MutationNotFound {
                expected: format!("{:?}", expected),
                actual: format!("{:?}", self.mutations),
            })
        }
    }

    /// Verify that a mutation was NOT made
    pub fn assert_not_mutated(&self, unexpected: &Mutation) -> VerifyResult<()> {
        if self.mutations.contains(unexpected) {
            Err(VerificationError::UnexpectedMutation {
                unexpected: format!("{:?}", unexpected),
                actual: format!("{:?}", self.mutations),
            })
        } else {
            Ok(())
        }
    }

    /// Verify how many mutations satisfy `pred`
    pub fn assert_count<F>(&self, what: &str, expected: usize, pred: F) -> VerifyResult<()>
    where
        F: Fn(&Mutation) -> bool,
    {
        let actual = self.mutations.iter().filter(|m| pred(m)).count();
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                what: what.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that `first` was made before `second`
    pub fn assert_ordered(&self, first: &Mutation, second: &Mutation) -> VerifyResult<()> {
        let position = |m: &Mutation| self.mutations.iter().position(|x| x == m);
        match (position(first), position(second)) {
            (Some(a), Some(b)) if a < b => Ok(()),
            (None, _) => Err(VerificationError::MutationNotFound {
                expected: format!("{:?}", first),
                actual: format!("{:?}", self.mutations),
            }),
            (_, None) => Err(VerificationError::MutationNotFound {
                expected: format!("{:?}", second),
                actual: format!("{:?}", self.mutations),
            }),
            _ => Err(VerificationError::UnexpectedMutation {
                unexpected: format!("{:?} before {:?}", second, first),
                actual: format!("{:?}", self.mutations),
            }),
        }
    }

    /// Get all captured mutations
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_verifier() {
        let mutations = vec![
            Mutation::AddBridge("lan0".to_string()),
            Mutation::SetMaster {
                link: "eth1".to_string(),
                master: "lan0".to_string(),
            },
            Mutation::SetUp("lan0".to_string()),
        ];

        let verifier = MutationVerifier::new(mutations);
        let add = Mutation::AddBridge("lan0".to_string());
        let up = Mutation::SetUp("lan0".to_string());

        assert!(verifier.assert_mutated(&add).is_ok());
        assert!(verifier.assert_not_mutated(&Mutation::SetUp("eth1".to_string())).is_ok());
        assert!(verifier.assert_ordered(&add, &up).is_ok());
        assert!(verifier.assert_ordered(&up, &add).is_err());
        assert!(verifier
            .assert_count("set_master", 1, |m| matches!(m, Mutation::SetMaster { .. }))
            .is_ok());

        assert!(verifier.assert_mutated(&Mutation::SetUp("eth9".to_string())).is_err());
    }
}
