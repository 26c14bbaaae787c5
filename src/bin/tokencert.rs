use tokencert::cli::{TokenCertCli, options::Options};

#[tokio::main]
async fn main() {
    match TokenCertCli::run(Options::from_args()).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(1);
        }
    }
}
