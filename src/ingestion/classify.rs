//! Indicator-count content classification.
//!
//! Each category rule carries a list of lowercase indicator substrings. A
//! page is scored by how many of a rule's indicators appear anywhere in its
//! combined `"{title} {text} {url}"` haystack; the highest count wins and
//! ties fall to the rule that appears first in the configured list. Pages
//! that match nothing classify as [`ContentCategory::General`].

use crate::ingestion::fetcher::FetchedPage;
use crate::sources::CategoryRule;
use crate::types::ContentCategory;

pub struct ContentClassifier {
    /// Rule order is the tie-break priority.
    rules: Vec<(ContentCategory, Vec<String>)>,
}

impl ContentClassifier {
    pub fn new(rules: &[CategoryRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let indicators = rule
                    .indicators
                    .iter()
                    .map(|indicator| indicator.to_lowercase())
                    .collect();
                (rule.category, indicators)
            })
            .collect();
        Self { rules }
    }

    /// Scores every rule against the page and returns the best category.
    pub fn classify(&self, title: &str, text: &str, url: &str) -> ContentCategory {
        let haystack = format!("{title} {text} {url}").to_lowercase();

        let mut best: Option<(usize, ContentCategory)> = None;
        for (category, indicators) in &self.rules {
            let hits = indicators
                .iter()
                .filter(|indicator| haystack.contains(indicator.as_str()))
                .count();
            if hits > 0 && best.is_none_or(|(best_hits, _)| hits > best_hits) {
                best = Some((hits, *category));
            }
        }

        best.map_or(ContentCategory::General, |(_, category)| category)
    }

    pub fn classify_page(&self, page: &FetchedPage) -> ContentCategory {
        self.classify(&page.title, &page.text, &page.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ChunkStrategy;

    fn rules() -> Vec<CategoryRule> {
        vec![
            CategoryRule {
                category: ContentCategory::ApiReference,
                indicators: vec!["api".into(), "parameters".into()],
                strategy: ChunkStrategy::PreserveStructure,
                chunk_size: 800,
                overlap: 100,
            },
            CategoryRule {
                category: ContentCategory::Tutorial,
                indicators: vec!["tutorial".into(), "step 1".into(), "lesson".into()],
                strategy: ChunkStrategy::SequentialSteps,
                chunk_size: 1200,
                overlap: 200,
            },
        ]
    }

    #[test]
    fn highest_indicator_count_wins() {
        let classifier = ContentClassifier::new(&rules());
        let category = classifier.classify(
            "Movement tutorial",
            "Step 1: open the lesson scene. The api is referenced once.",
            "https://docs.example.com/learn/movement",
        );
        // One api hit, three tutorial hits.
        assert_eq!(category, ContentCategory::Tutorial);
    }

    #[test]
    fn ties_break_by_rule_order() {
        let classifier = ContentClassifier::new(&rules());
        let category = classifier.classify(
            "Transform",
            "The api docs. This tutorial covers nothing else.",
            "https://docs.example.com/page",
        );
        // One hit each; api_reference is listed first.
        assert_eq!(category, ContentCategory::ApiReference);
    }

    #[test]
    fn no_hits_classifies_as_general() {
        let classifier = ContentClassifier::new(&rules());
        let category = classifier.classify("Release notes", "Fixed a crash.", "https://x.test/notes");
        assert_eq!(category, ContentCategory::General);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let classifier = ContentClassifier::new(&rules());
        let category = classifier.classify("API Reference", "PARAMETERS", "https://x.test/API");
        assert_eq!(category, ContentCategory::ApiReference);
    }
}
