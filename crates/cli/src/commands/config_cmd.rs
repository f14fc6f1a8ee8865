//! `socmate config` — print the default configuration or its location.

use socmate_config::AppConfig;

pub fn run(path: bool) {
    if path {
        println!("{}", AppConfig::config_dir().join("config.toml").display());
    } else {
        print!("{}", AppConfig::default_toml());
    }
}
