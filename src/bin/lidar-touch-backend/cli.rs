use clap::{command, Parser};

// Some defaults; some of which can be overriden via CLI args
const CONFIG_FILE_PATH: &str = "./touch.json";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Where to load sensor/screen/output config
    #[arg(long="configPath", default_value_t=String::from(CONFIG_FILE_PATH))]
    pub config_path: String,

    #[arg(long = "loglevel", default_value_t=String::from("info"))]
    pub log_level: String,

    /// Replace every configured scanner with the scripted mock variant,
    /// reading frames from the given scan-script file
    #[arg(long = "mockScript")]
    pub mock_script: Option<String>,

    /// Validate the config and exit without starting the pipeline
    #[arg(long = "checkConfig")]
    pub check_config: bool,
}
