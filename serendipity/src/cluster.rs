use serde::Serialize;
use std::collections::HashMap;

use crate::models::Article;

/// Articles sharing one topic label
#[derive(Debug, Clone, Serialize)]
pub struct TopicCluster {
    pub topic: String,
    pub articles: Vec<Article>,
}

/// Topic label → articles, buckets kept in first-encounter order.
///
/// An article carrying N topics is a member of N buckets.
#[derive(Debug, Clone, Default)]
pub struct TopicClusters {
    buckets: Vec<TopicCluster>,
    index: HashMap<String, usize>,
}

impl TopicClusters {
    pub fn from_articles(articles: &[Article]) -> Self {
        let mut clusters = TopicClusters::default();
        for article in articles {
            for topic in &article.topics {
                clusters.push(topic, article);
            }
        }
        clusters
    }

    fn push(&mut self, topic: &str, article: &Article) {
        let slot = match self.index.get(topic) {
            Some(&slot) => slot,
            None => {
                self.buckets.push(TopicCluster {
                    topic: topic.to_string(),
                    articles: Vec::new(),
                });
                self.index.insert(topic.to_string(), self.buckets.len() - 1);
                self.buckets.len() - 1
            }
        };
        self.buckets[slot].articles.push(article.clone());
    }

    pub fn get(&self, topic: &str) -> Option<&[Article]> {
        self.index
            .get(topic)
            .map(|&slot| self.buckets[slot].articles.as_slice())
    }

    /// Buckets in first-encounter order
    pub fn iter(&self) -> impl Iterator<Item = &TopicCluster> {
        self.buckets.iter()
    }

    /// Display order: largest bucket first, ties keep first-encounter order.
    pub fn sorted_by_size(&self) -> Vec<&TopicCluster> {
        let mut sorted: Vec<&TopicCluster> = self.buckets.iter().collect();
        sorted.sort_by(|a, b| b.articles.len().cmp(&a.articles.len()));
        sorted
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of (topic, article) memberships across all buckets.
    pub fn membership_count(&self) -> usize {
        self.buckets.iter().map(|b| b.articles.len()).sum()
    }
}
