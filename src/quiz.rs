//! # Quiz Rewards
//!
//! A lighter reward source with no task or slot: the user fetches a question
//! together with a one-shot `attempt_id`, answers it, and a correct answer is
//! credited through the payout engine.
//!
//! Attempt ids are minted by the server. [`issue`] stores the
//! `(user, attempt_id, question_id)` triple when the question is handed out,
//! and [`answer`] only accepts an attempt that was issued to that user for
//! that question. Each attempt is answered exactly once, in the same
//! transaction as its credit, so replaying an answer returns the original
//! result and pays nothing.
//!
//! The built-in bank has ten general-knowledge questions. A TOML file with
//! `[[question]]` tables replaces it when `market.question_bank` is set.

use crate::error::{MarketError, Result};
use crate::model::{Account, Money, Transaction};
use crate::payout::{self, CreditRequest};
use crate::store::MarketStore;
use anyhow::Context;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct: usize,
    pub reward: Money,
    pub difficulty: Difficulty,
}

/// What the user sees: the question without its answer.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub attempt_id: Uuid,
    pub question_id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub reward: Money,
    pub difficulty: Difficulty,
}

/// A question handed to a user under a fresh attempt id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizIssue {
    pub user_id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub user_id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: String,
    pub choice: i32,
    pub correct: bool,
    /// Amount credited for this attempt; zero for a wrong answer.
    pub reward: Money,
    pub transaction_id: Option<Uuid>,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    pub attempt: QuizAttempt,
    pub correct_option: usize,
    /// True when this attempt id had already been answered.
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    #[serde(rename = "question")]
    questions: Vec<Question>,
}

fn q(id: &str, prompt: &str, options: [&str; 4], correct: usize, cents: i64, difficulty: Difficulty) -> Question {
    Question {
        id: id.to_string(),
        prompt: prompt.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct,
        reward: Money::from_cents(cents),
        difficulty,
    }
}

impl QuestionBank {
    pub fn builtin() -> Self {
        use Difficulty::*;
        QuestionBank {
            questions: vec![
                q("1", "What is the capital of France?", ["London", "Paris", "Berlin", "Rome"], 1, 50, Easy),
                q("2", "What is 15 + 27?", ["40", "42", "43", "45"], 1, 25, Easy),
                q("3", "Which planet is known as the Red Planet?", ["Venus", "Jupiter", "Mars", "Saturn"], 2, 75, Medium),
                q("4", "What is the largest ocean on Earth?", ["Atlantic", "Indian", "Arctic", "Pacific"], 3, 60, Medium),
                q("5", "Who wrote \"Romeo and Juliet\"?", ["Charles Dickens", "William Shakespeare", "Mark Twain", "Jane Austen"], 1, 80, Medium),
                q("6", "What is the chemical symbol for gold?", ["Go", "Au", "Ag", "Gd"], 1, 100, Hard),
                q("7", "In what year did World War II end?", ["1944", "1945", "1946", "1947"], 1, 90, Hard),
                q("8", "What is the square root of 144?", ["11", "12", "13", "14"], 1, 40, Easy),
                q("9", "Which country is home to Machu Picchu?", ["Brazil", "Chile", "Peru", "Bolivia"], 2, 70, Medium),
                q("10", "What is the fastest land animal?", ["Lion", "Cheetah", "Leopard", "Tiger"], 1, 55, Easy),
            ],
        }
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let bank: QuestionBank = toml::from_str(raw).context("parsing question bank")?;
        bank.validate()?;
        Ok(bank)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading question bank {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.questions.is_empty(), "question bank is empty");
        let mut seen = HashSet::new();
        for question in &self.questions {
            anyhow::ensure!(
                seen.insert(question.id.as_str()),
                "duplicate question id {:?}",
                question.id
            );
            anyhow::ensure!(
                question.options.len() >= 2,
                "question {:?} needs at least two options",
                question.id
            );
            anyhow::ensure!(
                question.correct < question.options.len(),
                "question {:?} has correct index {} out of range",
                question.id,
                question.correct
            );
            anyhow::ensure!(
                question.reward.is_positive(),
                "question {:?} must have a positive reward",
                question.id
            );
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// `NextQuestion()`: a random question under a fresh attempt id.
    pub fn next_question(&self) -> Option<QuestionView> {
        let question = self.questions.choose(&mut rand::thread_rng())?;
        Some(QuestionView {
            attempt_id: Uuid::new_v4(),
            question_id: question.id.clone(),
            prompt: question.prompt.clone(),
            options: question.options.clone(),
            reward: question.reward,
            difficulty: question.difficulty,
        })
    }
}

/// Grade an answer. Returns the attempt to record and, for a correct answer,
/// the credit to apply with it.
pub fn grade(
    question: &Question,
    user_id: Uuid,
    attempt_id: Uuid,
    choice: i32,
    now: DateTime<Utc>,
) -> Result<(QuizAttempt, Option<CreditRequest>)> {
    let index = usize::try_from(choice)
        .ok()
        .filter(|i| *i < question.options.len())
        .ok_or_else(|| {
            MarketError::InvalidInput(format!(
                "choice {} is out of range for {} options",
                choice,
                question.options.len()
            ))
        })?;
    let correct = index == question.correct;
    let credit = correct
        .then(|| CreditRequest::for_quiz(user_id, attempt_id, question.reward, &question.prompt));
    let attempt = QuizAttempt {
        user_id,
        attempt_id,
        question_id: question.id.clone(),
        choice,
        correct,
        reward: if correct { question.reward } else { Money::ZERO },
        transaction_id: None,
        answered_at: now,
    };
    Ok((attempt, credit))
}

/// Record rule for a first-time attempt. `account` must be the locked row.
pub fn record(
    account: &mut Account,
    mut attempt: QuizAttempt,
    credit: Option<&CreditRequest>,
    now: DateTime<Utc>,
) -> Result<(QuizAttempt, Option<Transaction>)> {
    account.ensure_active()?;
    let tx = match credit {
        Some(req) => {
            let tx = payout::apply(account, req, None, now)?.into_transaction();
            attempt.transaction_id = Some(tx.id);
            Some(tx)
        }
        None => None,
    };
    Ok((attempt, tx))
}

/// `NextQuestion(user)`: pick a question and remember the attempt id.
pub async fn issue(
    store: &dyn MarketStore,
    bank: &QuestionBank,
    user_id: Uuid,
) -> Result<QuestionView> {
    let view = bank
        .next_question()
        .ok_or_else(|| MarketError::QuestionNotFound("question bank is empty".into()))?;
    store
        .issue_quiz_attempt(&QuizIssue {
            user_id,
            attempt_id: view.attempt_id,
            question_id: view.question_id.clone(),
            issued_at: Utc::now(),
        })
        .await?;
    Ok(view)
}

/// `AnswerQuestion(user, attempt_id, question_id, choice)`.
pub async fn answer(
    store: &dyn MarketStore,
    bank: &QuestionBank,
    user_id: Uuid,
    attempt_id: Uuid,
    question_id: &str,
    choice: i32,
) -> Result<AnswerOutcome> {
    let issued = store
        .find_quiz_issue(user_id, attempt_id)
        .await?
        .ok_or(MarketError::AttemptNotFound(attempt_id))?;
    if issued.question_id != question_id {
        return Err(MarketError::InvalidInput(format!(
            "attempt {} was issued for question {:?}, not {:?}",
            attempt_id, issued.question_id, question_id
        )));
    }
    let question = bank
        .get(question_id)
        .ok_or_else(|| MarketError::QuestionNotFound(question_id.to_string()))?;
    let now = Utc::now();
    let (attempt, credit) = grade(question, user_id, attempt_id, choice, now)?;
    let (attempt, fresh) = store
        .record_quiz_answer(&attempt, credit.as_ref(), now)
        .await?;
    let correct_option = bank
        .get(&attempt.question_id)
        .map(|q| q.correct)
        .unwrap_or(question.correct);
    Ok(AnswerOutcome {
        attempt,
        correct_option,
        replayed: !fresh,
    })
}
