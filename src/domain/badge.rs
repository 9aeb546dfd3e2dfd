// src/domain/badge.rs
//
// Badge definitions
//
// Predicates live in the badge engine; this module only names the badges
// and their static attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    /// Reads media metadata
    Static,
    /// Reads post metrics
    Interaction,
    /// Reads handler telemetry
    Handler,
    /// Awarded explicitly
    Arbitrary,
}

impl BadgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BadgeKind::Static => "static",
            BadgeKind::Interaction => "interaction",
            BadgeKind::Handler => "handler",
            BadgeKind::Arbitrary => "arbitrary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Badge {
    Vintage,
    FemaleDirector,
    Anime,
    Epic,
    Liked,
    Loved,
    Talkative,
    Shared,
    Viral,
    Clicked,
    Artist,
    PretentiousRequester,
    Rejected,
}

impl Badge {
    pub const ALL: [Badge; 13] = [
        Badge::Vintage,
        Badge::FemaleDirector,
        Badge::Anime,
        Badge::Epic,
        Badge::Liked,
        Badge::Loved,
        Badge::Talkative,
        Badge::Shared,
        Badge::Viral,
        Badge::Clicked,
        Badge::Artist,
        Badge::PretentiousRequester,
        Badge::Rejected,
    ];

    /// Stable database id
    pub fn id(&self) -> i64 {
        match self {
            Badge::Vintage => 1,
            Badge::FemaleDirector => 2,
            Badge::Anime => 3,
            Badge::Epic => 4,
            Badge::Liked => 10,
            Badge::Loved => 11,
            Badge::Talkative => 12,
            Badge::Shared => 13,
            Badge::Viral => 14,
            Badge::Clicked => 15,
            Badge::Artist => 20,
            Badge::PretentiousRequester => 21,
            Badge::Rejected => 30,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Badge::Vintage => "vintage",
            Badge::FemaleDirector => "female_director",
            Badge::Anime => "anime",
            Badge::Epic => "epic",
            Badge::Liked => "liked",
            Badge::Loved => "loved",
            Badge::Talkative => "talkative",
            Badge::Shared => "shared",
            Badge::Viral => "viral",
            Badge::Clicked => "clicked",
            Badge::Artist => "artist",
            Badge::PretentiousRequester => "pretentious_requester",
            Badge::Rejected => "rejected",
        }
    }

    /// Contribution to the user's points; rejections cost points
    pub fn weight(&self) -> i64 {
        match self {
            Badge::Vintage => 2,
            Badge::FemaleDirector => 3,
            Badge::Anime => 1,
            Badge::Epic => 2,
            Badge::Liked => 1,
            Badge::Loved => 3,
            Badge::Talkative => 2,
            Badge::Shared => 2,
            Badge::Viral => 5,
            Badge::Clicked => 1,
            Badge::Artist => 2,
            Badge::PretentiousRequester => 1,
            Badge::Rejected => -2,
        }
    }

    pub fn kind(&self) -> BadgeKind {
        match self {
            Badge::Vintage | Badge::FemaleDirector | Badge::Anime | Badge::Epic => {
                BadgeKind::Static
            }
            Badge::Liked
            | Badge::Loved
            | Badge::Talkative
            | Badge::Shared
            | Badge::Viral
            | Badge::Clicked => BadgeKind::Interaction,
            Badge::Artist | Badge::PretentiousRequester => BadgeKind::Handler,
            Badge::Rejected => BadgeKind::Arbitrary,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Badge::ALL.iter().copied().find(|b| b.id() == id)
    }

    pub fn of_kind(kind: BadgeKind) -> impl Iterator<Item = Badge> {
        Badge::ALL.into_iter().filter(move |b| b.kind() == kind)
    }
}

/// An awarded badge; unique per (user, post, badge)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Award {
    pub user_id: String,
    /// Absent for awards not tied to a post (rejections)
    pub post_id: Option<String>,
    pub badge: Badge,
    pub created_at: DateTime<Utc>,
}

impl Award {
    pub fn new(user_id: String, post_id: Option<String>, badge: Badge) -> Self {
        Self {
            user_id,
            post_id,
            badge,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_round_trip() {
        let ids: HashSet<i64> = Badge::ALL.iter().map(|b| b.id()).collect();
        assert_eq!(ids.len(), Badge::ALL.len());
        for badge in Badge::ALL {
            assert_eq!(Badge::from_id(badge.id()), Some(badge));
        }
    }

    #[test]
    fn test_kind_partition() {
        assert_eq!(Badge::of_kind(BadgeKind::Handler).count(), 2);
        assert_eq!(Badge::of_kind(BadgeKind::Arbitrary).collect::<Vec<_>>(), vec![Badge::Rejected]);
    }
}
