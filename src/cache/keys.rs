pub fn deck_stats_key(deck_id: &str) -> String {
    format!("deck:{}:stats", deck_id)
}

pub fn user_stats_key(user_id: &str) -> String {
    format!("user:{}:study_stats", user_id)
}
