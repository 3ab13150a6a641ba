// 🏷️ Category - fixed business taxonomy
//
// Every business lands in exactly one of these. Anything a source says that
// the lookup rules don't recognize becomes `Other`, never an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Restaurant,
    Cafe,
    Bar,
    Bakery,
    Retail,
    Grocery,
    Fitness,
    Beauty,
    Health,
    Finance,
    Automotive,
    Lodging,
    Entertainment,
    Service,
    Other,
}

impl Category {
    pub const ALL: [Category; 15] = [
        Category::Restaurant,
        Category::Cafe,
        Category::Bar,
        Category::Bakery,
        Category::Retail,
        Category::Grocery,
        Category::Fitness,
        Category::Beauty,
        Category::Health,
        Category::Finance,
        Category::Automotive,
        Category::Lodging,
        Category::Entertainment,
        Category::Service,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Restaurant => "restaurant",
            Category::Cafe => "cafe",
            Category::Bar => "bar",
            Category::Bakery => "bakery",
            Category::Retail => "retail",
            Category::Grocery => "grocery",
            Category::Fitness => "fitness",
            Category::Beauty => "beauty",
            Category::Health => "health",
            Category::Finance => "finance",
            Category::Automotive => "automotive",
            Category::Lodging => "lodging",
            Category::Entertainment => "entertainment",
            Category::Service => "service",
            Category::Other => "other",
        }
    }

    /// Lenient parse for values read back from storage; unknown → Other
    pub fn from_str_lossy(s: &str) -> Category {
        s.parse().unwrap_or(Category::Other)
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Other
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
    }

    #[test]
    fn test_lossy_parse_falls_back_to_other() {
        assert_eq!(Category::from_str_lossy("Restaurant"), Category::Restaurant);
        assert_eq!(Category::from_str_lossy("space station"), Category::Other);
    }
}
