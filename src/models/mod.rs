pub mod campaign;
pub mod content;
pub mod course;
pub mod phishing;
pub mod quiz;
pub mod timeseries;
pub mod user;

pub use campaign::{Campaign, CampaignActivity, CourseCampaign, EmployeeCourseCampaign};
pub use content::Content;
pub use course::{Course, UserCourse};
pub use phishing::{EmployeePhishingCampaign, PhishingCampaign, PhishingTemplate};
pub use quiz::{Question, QuestionOption};
pub use user::{
    AuthorizedDomain, DeliverabilityTest, Department, EmployeeProfile, OrganizationProfile, User,
};

use serde::{Deserialize, Serialize};

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($name), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Organization,
    Employee,
}
text_enum!(Role { Admin => "admin", Organization => "organization", Employee => "employee" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum LearningType {
    General,
    Specialized,
}
text_enum!(LearningType { General => "general", Specialized => "specialized" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CampaignKind {
    General,
    Specialized,
    Phishing,
}
text_enum!(CampaignKind { General => "general", Specialized => "specialized", Phishing => "phishing" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Active,
    Completed,
    Cancelled,
}
text_enum!(CampaignStatus {
    Draft => "draft",
    Scheduled => "scheduled",
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EmployeeStatus {
    Active,
    Pending,
    Deactivated,
}
text_enum!(EmployeeStatus { Active => "active", Pending => "pending", Deactivated => "deactivated" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EmailDeliveryType {
    Immediately,
    Scheduled,
    ScheduledRange,
}
text_enum!(EmailDeliveryType {
    Immediately => "immediately",
    Scheduled => "scheduled",
    ScheduledRange => "scheduled_range",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PhishingAction {
    NoAction,
    Opened,
    Clicked,
    Compromised,
    Reported,
}
text_enum!(PhishingAction {
    NoAction => "no_action",
    Opened => "opened",
    Clicked => "clicked",
    Compromised => "compromised",
    Reported => "reported",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Illustration,
    Slideshow,
}
text_enum!(ContentKind { Video => "video", Illustration => "illustration", Slideshow => "slideshow" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum QuestionKind {
    SingleChoice,
    MultiChoice,
}
text_enum!(QuestionKind { SingleChoice => "singlechoice", MultiChoice => "multichoice" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ActivityKind {
    CourseCampaignStarted,
    CourseCampaignCompleted,
    CourseStarted,
    CourseCompleted,
}
text_enum!(ActivityKind {
    CourseCampaignStarted => "course_campaign_started",
    CourseCampaignCompleted => "course_campaign_completed",
    CourseStarted => "course_started",
    CourseCompleted => "course_completed",
});

impl ActivityKind {
    pub fn describe(&self, first_name: &str) -> String {
        match self {
            ActivityKind::CourseCampaignStarted => format!("{} started a course campaign", first_name),
            ActivityKind::CourseCampaignCompleted => {
                format!("{} completed a course campaign", first_name)
            }
            ActivityKind::CourseStarted => format!("{} started a course", first_name),
            ActivityKind::CourseCompleted => format!("{} completed a course", first_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enum_text_roundtrip() {
        assert_eq!(PhishingAction::from_str("no_action").unwrap(), PhishingAction::NoAction);
        assert_eq!(EmailDeliveryType::ScheduledRange.as_str(), "scheduled_range");
        assert_eq!(QuestionKind::from_str("multichoice").unwrap(), QuestionKind::MultiChoice);
        assert!(CampaignStatus::from_str("paused").is_err());
    }

    #[test]
    fn serde_matches_db_text() {
        let v = serde_json::to_value(CampaignKind::Phishing).unwrap();
        assert_eq!(v, serde_json::json!("phishing"));
        let v = serde_json::to_value(ActivityKind::CourseCampaignStarted).unwrap();
        assert_eq!(v, serde_json::json!("course_campaign_started"));
    }
}
