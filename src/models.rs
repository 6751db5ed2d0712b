use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)
}

fn parse_json_or(raw: Option<String>, fallback: Value) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(fallback)
}

// ---------------------------------------------------------------------------
// Catalog

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseModule {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub position: i64,
    pub section_count: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCourseModule {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub position: i64,
    pub section_count: i64,
}

impl From<DbCourseModule> for CourseModule {
    fn from(db: DbCourseModule) -> Self {
        Self {
            id: db.id,
            title: db.title,
            description: db.description.unwrap_or_default(),
            position: db.position,
            section_count: db.section_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSection {
    pub module_id: i64,
    pub section_id: String,
    pub title: String,
    pub position: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetail {
    #[serde(flatten)]
    pub module: CourseModule,
    pub sections: Vec<ModuleSection>,
}

// ---------------------------------------------------------------------------
// Progress

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionProgress {
    pub id: i64,
    pub user_id: i64,
    pub module_id: i64,
    pub section_id: String,
    pub completed: bool,
    pub score: Option<i64>,
    pub time_spent: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSectionProgress {
    pub id: i64,
    pub user_id: i64,
    pub module_id: i64,
    pub section_id: String,
    pub completed: bool,
    pub score: Option<i64>,
    pub time_spent: i64,
    pub last_accessed: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

impl From<DbSectionProgress> for SectionProgress {
    fn from(db: DbSectionProgress) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            module_id: db.module_id,
            section_id: db.section_id,
            completed: db.completed,
            score: db.score,
            time_spent: db.time_spent,
            last_accessed: db.last_accessed.map(to_utc),
            completed_at: db.completed_at.map(to_utc),
        }
    }
}

/// Completion of one module for one user.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCompletion {
    pub module_id: i64,
    pub completed_sections: i64,
    pub total_sections: i64,
    pub progress: i64,
}

impl ModuleCompletion {
    pub fn new(module_id: i64, completed_sections: i64, total_sections: i64) -> Self {
        Self {
            module_id,
            completed_sections,
            total_sections,
            progress: completion_percentage(completed_sections, total_sections),
        }
    }

    /// A module with no known sections is never complete.
    pub fn is_complete(&self) -> bool {
        self.total_sections > 0 && self.completed_sections >= self.total_sections
    }
}

/// `round(100 * completed / total)`, rounding halves up, in whole percent.
/// Zero known sections yield 0.
pub fn completion_percentage(completed: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    let completed = completed.clamp(0, total);
    (200 * completed + total) / (2 * total)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgressReport {
    #[serde(flatten)]
    pub completion: ModuleCompletion,
    pub sections: Vec<SectionProgress>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub module_id: i64,
    pub progress: i64,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbEnrollment {
    pub id: i64,
    pub user_id: i64,
    pub module_id: i64,
    pub progress: i64,
    pub enrolled_at: Option<NaiveDateTime>,
    pub last_accessed_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

impl From<DbEnrollment> for Enrollment {
    fn from(db: DbEnrollment) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            module_id: db.module_id,
            progress: db.progress,
            enrolled_at: db.enrolled_at.map(to_utc),
            last_accessed_at: db.last_accessed_at.map(to_utc),
            completed_at: db.completed_at.map(to_utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserMetrics {
    pub modules_started: i64,
    pub modules_completed: i64,
    pub sections_completed: i64,
    pub total_time_spent: i64,
    pub quiz_questions_answered: i64,
    pub quiz_accuracy: i64,
    pub achievements_earned: i64,
}

// ---------------------------------------------------------------------------
// Quizzes

/// A quiz question as learners see it: the answer stays on the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: i64,
    pub module_id: i64,
    pub question: String,
    pub options: Vec<String>,
    pub position: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbQuiz {
    pub id: i64,
    pub module_id: i64,
    pub question: String,
    pub options: String,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub position: i64,
}

impl DbQuiz {
    pub fn options(&self) -> Vec<String> {
        serde_json::from_str(&self.options).unwrap_or_default()
    }
}

impl From<DbQuiz> for QuizQuestion {
    fn from(db: DbQuiz) -> Self {
        Self {
            options: db.options(),
            id: db.id,
            module_id: db.module_id,
            question: db.question,
            position: db.position,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswerResult {
    pub response_id: i64,
    pub correct: bool,
    pub correct_answer: String,
    pub explanation: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub module_id: i64,
    pub total_questions: i64,
    pub answered: i64,
    pub correct: i64,
    pub score: i64,
    pub passed: bool,
}

// ---------------------------------------------------------------------------
// Achievements

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AchievementKind {
    Badge,
    Certificate,
    Milestone,
}

impl AchievementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementKind::Badge => "badge",
            AchievementKind::Certificate => "certificate",
            AchievementKind::Milestone => "milestone",
        }
    }
}

impl FromStr for AchievementKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "badge" => Ok(AchievementKind::Badge),
            "certificate" => Ok(AchievementKind::Certificate),
            "milestone" => Ok(AchievementKind::Milestone),
            _ => Err(AppError::Internal(format!("Unknown achievement kind: {}", s))),
        }
    }
}

impl fmt::Display for AchievementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub criteria: Value,
    pub kind: AchievementKind,
    pub image_url: Option<String>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAchievement {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub criteria: String,
    pub kind: String,
    pub image_url: Option<String>,
}

impl TryFrom<DbAchievement> for Achievement {
    type Error = AppError;

    fn try_from(db: DbAchievement) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: db.kind.parse()?,
            criteria: parse_json_or(Some(db.criteria), Value::Object(Default::default())),
            id: db.id,
            name: db.name,
            description: db.description,
            image_url: db.image_url,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AwardSource {
    ModuleCompletion,
    Manual,
    Admin,
}

/// Internal record of why an achievement was granted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwardMetadata {
    pub source: AwardSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<i64>,
    pub achievement_name: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievement {
    pub id: i64,
    pub user_id: i64,
    pub achievement_id: i64,
    pub earned_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserAchievement {
    pub id: i64,
    pub user_id: i64,
    pub achievement_id: i64,
    pub earned_at: Option<NaiveDateTime>,
    pub metadata: String,
}

impl From<DbUserAchievement> for UserAchievement {
    fn from(db: DbUserAchievement) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            achievement_id: db.achievement_id,
            earned_at: db.earned_at.map(to_utc),
            metadata: parse_json_or(Some(db.metadata), Value::Null),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EarnedAchievement {
    #[serde(flatten)]
    pub award: UserAchievement,
    pub achievement: Achievement,
}

/// Row of `user_achievements` joined with its definition.
#[derive(sqlx::FromRow, Clone)]
pub struct DbEarnedAchievement {
    pub id: i64,
    pub user_id: i64,
    pub achievement_id: i64,
    pub earned_at: Option<NaiveDateTime>,
    pub metadata: String,
    pub name: String,
    pub description: String,
    pub criteria: String,
    pub kind: String,
    pub image_url: Option<String>,
}

impl TryFrom<DbEarnedAchievement> for EarnedAchievement {
    type Error = AppError;

    fn try_from(db: DbEarnedAchievement) -> Result<Self, Self::Error> {
        let achievement = Achievement::try_from(DbAchievement {
            id: db.achievement_id,
            name: db.name,
            description: db.description,
            criteria: db.criteria,
            kind: db.kind,
            image_url: db.image_url,
        })?;

        Ok(Self {
            award: UserAchievement::from(DbUserAchievement {
                id: db.id,
                user_id: db.user_id,
                achievement_id: db.achievement_id,
                earned_at: db.earned_at,
                metadata: db.metadata,
            }),
            achievement,
        })
    }
}

// ---------------------------------------------------------------------------
// Virtual wallet

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Buy,
    Sell,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Buy => "buy",
            TransactionKind::Sell => "sell",
        }
    }

    /// Whether the transaction adds to the balance.
    pub fn credits(&self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::Sell)
    }
}

impl FromStr for TransactionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "buy" => Ok(TransactionKind::Buy),
            "sell" => Ok(TransactionKind::Sell),
            _ => Err(AppError::Internal(format!("Unknown transaction kind: {}", s))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualWallet {
    pub id: i64,
    pub user_id: i64,
    pub balance: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbVirtualWallet {
    pub id: i64,
    pub user_id: i64,
    pub balance: f64,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbVirtualWallet> for VirtualWallet {
    fn from(db: DbVirtualWallet) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            balance: db.balance,
            created_at: db.created_at.map(to_utc),
            updated_at: db.updated_at.map(to_utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualTransaction {
    pub id: i64,
    pub wallet_id: i64,
    pub kind: TransactionKind,
    pub asset: String,
    pub amount: f64,
    pub price: f64,
    pub balance_after: f64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbVirtualTransaction {
    pub id: i64,
    pub wallet_id: i64,
    pub kind: String,
    pub asset: String,
    pub amount: f64,
    pub price: f64,
    pub balance_after: f64,
    pub created_at: Option<NaiveDateTime>,
}

impl TryFrom<DbVirtualTransaction> for VirtualTransaction {
    type Error = AppError;

    fn try_from(db: DbVirtualTransaction) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: db.kind.parse()?,
            id: db.id,
            wallet_id: db.wallet_id,
            asset: db.asset,
            amount: db.amount,
            price: db.price,
            balance_after: db.balance_after,
            created_at: db.created_at.map(to_utc),
        })
    }
}

// ---------------------------------------------------------------------------
// Glossary

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryTerm {
    pub id: i64,
    pub term: String,
    pub definition: String,
    pub category: String,
    pub difficulty: String,
    pub related_terms: Vec<String>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbGlossaryTerm {
    pub id: i64,
    pub term: String,
    pub definition: String,
    pub category: String,
    pub difficulty: String,
    pub related_terms: String,
}

impl From<DbGlossaryTerm> for GlossaryTerm {
    fn from(db: DbGlossaryTerm) -> Self {
        Self {
            related_terms: serde_json::from_str(&db.related_terms).unwrap_or_default(),
            id: db.id,
            term: db.term,
            definition: db.definition,
            category: db.category,
            difficulty: db.difficulty,
        }
    }
}

// ---------------------------------------------------------------------------
// Admin views

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserSummary {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
    pub modules_started: i64,
    pub modules_completed: i64,
    pub achievements_earned: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub users: i64,
    pub enrollments: i64,
    pub completed_modules: i64,
    pub achievements_awarded: i64,
    pub quiz_responses: i64,
    pub total_time_spent: i64,
}
