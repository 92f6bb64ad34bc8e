use crate::core::config::data::{path_display, Config};
use crate::core::thinking::TagPair;

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match &self.default_provider {
            Some(provider) => println!("  default-provider: {provider}"),
            None => println!("  default-provider: (unset)"),
        }
        match &self.default_model {
            Some(model) => println!("  default-model: {model}"),
            None => println!("  default-model: (unset)"),
        }

        let policy = self.flush_policy();
        println!("  flush-interval: {}ms", policy.flush_interval.as_millis());
        println!(
            "  flush-interval-complete: {}ms",
            policy.flush_interval_complete.as_millis()
        );

        match self.thinking_pairs() {
            Ok(pairs) => println!("  thinking-tags: {}", TagPair::format_list(&pairs)),
            Err(err) => println!("  thinking-tags: (invalid: {err})"),
        }
        match &self.emoji_table {
            Some(path) => println!("  emoji-table: {}", path_display(path)),
            None => println!("  emoji-table: (bundled)"),
        }

        println!("  providers:");
        for provider in self.all_providers() {
            let key = match provider.api_key_env.as_deref() {
                Some(var) => format!(" (key: ${var})"),
                None => String::new(),
            };
            println!(
                "    {}: {} {}{}",
                provider.id,
                provider.kind.as_str(),
                provider.base_url,
                key
            );
        }
    }
}
