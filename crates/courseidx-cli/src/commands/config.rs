use courseidx_config::CourseIdxConfig;

pub fn show(config: &CourseIdxConfig) -> anyhow::Result<()> {
    // Print as YAML for readability
    let yaml = serde_yaml::to_string(config)?;
    println!("{}", yaml);
    Ok(())
}

pub fn validate(config: &CourseIdxConfig) -> anyhow::Result<()> {
    let errors = config.validate();

    if errors.is_empty() {
        println!("Configuration is valid.");
        Ok(())
    } else {
        eprintln!("Configuration has {} error(s):", errors.len());
        for (i, err) in errors.iter().enumerate() {
            eprintln!("  {}: {}", i + 1, err);
        }
        anyhow::bail!("{} validation error(s) found", errors.len())
    }
}
