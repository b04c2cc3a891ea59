//! `warmprompt template-hash`: Print the value to pin as `prompt.expected_sha256`.

use anyhow::Context;
use warmprompt_compose::StaticTemplate;
use warmprompt_config::AppConfig;

pub fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let text = config.prompt.load_template()?;
    let template = StaticTemplate::new(config.prompt.template_version.clone(), text)?;

    println!("version: {}", template.version());
    println!("sha256:  {}", template.sha256());
    println!("tokens:  ~{}", template.token_count());

    if let Some(expected) = &config.prompt.expected_sha256 {
        match template.verify_pinned(expected) {
            Ok(()) => println!("pinned:  matches"),
            Err(e) => println!("pinned:  MISMATCH ({e})"),
        }
    }
    Ok(())
}
