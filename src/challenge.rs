use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{VerifyError, VerifyResult};

/// Words an enrollment phrase is drawn from.
pub const ENROLLMENT_WORDS: [&str; 18] = [
    "machine",
    "learning",
    "data",
    "science",
    "python",
    "flask",
    "student",
    "teacher",
    "voice",
    "recognition",
    "system",
    "database",
    "model",
    "feature",
    "classroom",
    "attendance",
    "speech",
    "verify",
];

/// Sentences read back during verification.
pub const VERIFICATION_PHRASES: [&str; 5] = [
    "Artificial intelligence is the future.",
    "The quick brown fox jumps over the lazy dog.",
    "Today is a beautiful day.",
    "I love learning new things.",
    "Technology is evolving rapidly.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Enrollment,
    Verification,
}

/// `n` distinct enrollment words joined by spaces.
pub fn enrollment_phrase<R: Rng + ?Sized>(rng: &mut R, n: usize) -> String {
    ENROLLMENT_WORDS
        .choose_multiple(rng, n.min(ENROLLMENT_WORDS.len()))
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn verification_phrase<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    VERIFICATION_PHRASES
        .choose(rng)
        .copied()
        .unwrap_or(VERIFICATION_PHRASES[0])
}

/// A phrase issued for one attempt.
///
/// Not `Clone`: verifying consumes it, so a recording can never be checked
/// twice against the same phrase.
#[derive(Debug, Serialize)]
pub struct Challenge {
    pub id: Uuid,
    pub identity: String,
    pub purpose: Purpose,
    pub phrase: String,
    pub issued_at: DateTime<Utc>,
}

impl Challenge {
    pub fn new(identity: &str, purpose: Purpose, phrase: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            purpose,
            phrase: phrase.into(),
            issued_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.issued_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Refuse a challenge issued to someone else or for the other flow.
    pub fn ensure_for(&self, identity: &str, purpose: Purpose) -> VerifyResult<()> {
        if self.identity != identity || self.purpose != purpose {
            return Err(VerifyError::MissingChallenge);
        }
        Ok(())
    }
}

/// Outstanding challenges, each redeemable once before it expires.
pub struct ChallengeBook {
    ttl: Duration,
    enroll_words: usize,
    issued: Mutex<HashMap<Uuid, Challenge>>,
}

impl ChallengeBook {
    pub fn new(ttl: Duration, enroll_words: usize) -> Self {
        Self {
            ttl,
            enroll_words,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh phrase and return its id and text.
    pub fn issue(&self, identity: &str, purpose: Purpose) -> VerifyResult<(Uuid, String)> {
        let mut rng = rand::thread_rng();
        let phrase = match purpose {
            Purpose::Enrollment => enrollment_phrase(&mut rng, self.enroll_words),
            Purpose::Verification => verification_phrase(&mut rng).to_string(),
        };
        self.insert(Challenge::new(identity, purpose, phrase))
    }

    /// Register a challenge built elsewhere.
    pub fn insert(&self, challenge: Challenge) -> VerifyResult<(Uuid, String)> {
        let issued = (challenge.id, challenge.phrase.clone());
        let mut book = self.book()?;
        book.retain(|_, c| c.age() <= self.ttl);
        book.insert(challenge.id, challenge);
        Ok(issued)
    }

    fn book(&self) -> VerifyResult<MutexGuard<'_, HashMap<Uuid, Challenge>>> {
        self.issued
            .lock()
            .map_err(|_| VerifyError::storage("challenge book lock poisoned"))
    }

    /// Take the challenge out of the book; it cannot be redeemed again.
    ///
    /// A redeem by the wrong identity or for the wrong flow leaves the
    /// challenge in place for its owner.
    pub fn redeem(&self, id: Uuid, identity: &str, purpose: Purpose) -> VerifyResult<Challenge> {
        let mut book = self.book()?;
        book.get(&id)
            .ok_or(VerifyError::MissingChallenge)?
            .ensure_for(identity, purpose)?;
        let challenge = book.remove(&id).ok_or(VerifyError::MissingChallenge)?;
        if challenge.age() > self.ttl {
            return Err(VerifyError::ChallengeExpired);
        }
        Ok(challenge)
    }

    pub fn outstanding(&self) -> usize {
        self.issued.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_enrollment_phrase_has_distinct_words() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let phrase = enrollment_phrase(&mut rng, 6);
            let words: Vec<&str> = phrase.split(' ').collect();
            assert_eq!(words.len(), 6);
            assert_eq!(words.iter().collect::<HashSet<_>>().len(), 6);
            assert!(words.iter().all(|w| ENROLLMENT_WORDS.contains(w)));
        }
        assert_eq!(enrollment_phrase(&mut rng, 40).split(' ').count(), 18);
    }

    #[test]
    fn test_verification_phrase_from_list() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert!(VERIFICATION_PHRASES.contains(&verification_phrase(&mut rng)));
        }
    }

    #[test]
    fn test_redeem_once() -> VerifyResult<()> {
        let book = ChallengeBook::new(Duration::from_secs(60), 6);
        let (id, phrase) = book.issue("alice", Purpose::Verification)?;
        let challenge = book.redeem(id, "alice", Purpose::Verification)?;
        assert_eq!(challenge.phrase, phrase);
        assert!(matches!(
            book.redeem(id, "alice", Purpose::Verification),
            Err(VerifyError::MissingChallenge)
        ));
        Ok(())
    }

    #[test]
    fn test_other_identity_cannot_redeem() -> VerifyResult<()> {
        let book = ChallengeBook::new(Duration::from_secs(60), 6);
        let (id, _) = book.issue("alice", Purpose::Enrollment)?;
        assert!(matches!(
            book.redeem(id, "bob", Purpose::Enrollment),
            Err(VerifyError::MissingChallenge)
        ));
        assert!(matches!(
            book.redeem(id, "alice", Purpose::Verification),
            Err(VerifyError::MissingChallenge)
        ));
        // neither attempt spent it
        assert_eq!(book.outstanding(), 1);
        assert!(book.redeem(id, "alice", Purpose::Enrollment).is_ok());
        Ok(())
    }

    #[test]
    fn test_expired_challenge() {
        let book = ChallengeBook::new(Duration::from_secs(60), 6);
        let mut old = Challenge::new("alice", Purpose::Verification, "Today is a beautiful day.");
        old.issued_at = Utc::now() - chrono::Duration::seconds(120);
        let id = old.id;
        book.issued.lock().map(|mut b| b.insert(id, old)).ok();
        assert!(matches!(
            book.redeem(id, "alice", Purpose::Verification),
            Err(VerifyError::ChallengeExpired)
        ));
    }
}
