use utoipa::OpenApi;
use vibe_live_back::services::documentation::ApiDoc;

fn main() {
    let doc = ApiDoc::openapi();
    match doc.to_pretty_json() {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("failed to render the OpenAPI document: {err}");
            std::process::exit(1);
        }
    }
}
