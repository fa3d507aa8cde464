//! Keyword heuristics assigning a source type and topic labels to each article.

use crate::models::SourceType;

/// Label attached when no topic keyword matches.
pub const GENERAL_TOPIC: &str = "General";

const RESEARCH_DOMAINS: &[&str] = &[
    "pubmed",
    "ncbi",
    "frontiersin",
    "mdpi",
    "springer",
    "wiley",
    "biomedcentral",
];

const PREPRINT_DOMAINS: &[&str] = &["arxiv", "biorxiv"];

const INDUSTRY_DOMAINS: &[&str] = &[
    "dvm360",
    "veterinarypracticenews",
    "avma",
    "todaysveterinary",
    "vin.com",
];

/// Topic label → keywords, checked in this order.
pub const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Diagnostic Imaging",
        &[
            "radiology",
            "radiograph",
            "ultrasound",
            "imaging",
            "x-ray",
            "ct scan",
            "mri",
            "diagnostic imaging",
        ],
    ),
    (
        "Clinical Decision Support",
        &[
            "diagnosis",
            "clinical decision",
            "differential",
            "prognosis",
            "treatment recommendation",
            "decision support",
        ],
    ),
    (
        "Practice Management",
        &[
            "practice management",
            "workflow",
            "scheduling",
            "billing",
            "client communication",
            "efficiency",
            "automation",
        ],
    ),
    (
        "Pathology & Lab",
        &[
            "pathology",
            "cytology",
            "histology",
            "laboratory",
            "blood work",
            "urinalysis",
            "lab results",
        ],
    ),
    (
        "Telemedicine",
        &["telemedicine", "telehealth", "remote", "virtual consult", "teleconsult"],
    ),
    (
        "Livestock & Production",
        &["livestock", "cattle", "poultry", "swine", "dairy", "production animal", "farm", "herd"],
    ),
    (
        "Research & Academia",
        &[
            "study",
            "research",
            "university",
            "published",
            "journal",
            "peer-reviewed",
            "clinical trial",
        ],
    ),
    (
        "Startups & Industry",
        &["startup", "company", "launch", "funding", "venture", "product", "platform", "announces"],
    ),
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Source type from url and title. Research, preprint and industry rules are
/// tried in that order; the first hit wins.
pub fn categorize(url: &str, title: &str) -> SourceType {
    let u = url.to_lowercase();
    let t = title.to_lowercase();

    if contains_any(&u, RESEARCH_DOMAINS) {
        SourceType::Research
    } else if contains_any(&u, PREPRINT_DOMAINS) || t.contains("preprint") {
        SourceType::Preprint
    } else if contains_any(&u, INDUSTRY_DOMAINS) {
        SourceType::Industry
    } else {
        SourceType::News
    }
}

/// Topic labels whose keywords occur in the title or snippet. Never empty.
pub fn detect_topics(title: &str, snippet: &str) -> Vec<String> {
    let text = format!("{} {}", title, snippet).to_lowercase();

    let topics: Vec<String> = TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| contains_any(&text, keywords))
        .map(|(topic, _)| topic.to_string())
        .collect();

    if topics.is_empty() {
        vec![GENERAL_TOPIC.to_string()]
    } else {
        topics
    }
}
