use crate::core::config::handle::ActiveConfig;

impl ActiveConfig {
    pub fn print_all(&self) {
        let endpoint = self.endpoint();
        println!("Current configuration:");
        println!("  environment: {}", self.environment());
        println!("  api-url: {}", endpoint.api_url);
        match endpoint.api_key {
            Some(_) => println!("  api-key: (set)"),
            None => println!("  api-key: (unset)"),
        }
        match self.debug() {
            true => println!("  debug: on"),
            false => println!("  debug: off"),
        }
        println!("  scenarios:");
        let mut names = self.resolver().scenario_names(self.environment());
        names.push(crate::core::config::defaults::DEFAULT_SCENARIO.to_string());
        for name in names {
            let scenario = self.resolve(&name);
            println!(
                "    {}: model={} temperature={} max-tokens={} stream={} timeout={}s retries={}",
                scenario.name,
                scenario.model,
                scenario.temperature,
                scenario.max_tokens,
                if scenario.stream { "on" } else { "off" },
                scenario.timeout.as_secs(),
                scenario.max_retries
            );
        }
    }
}
