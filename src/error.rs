use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum RefError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug, Diagnostic)]
pub enum DecodeError {
    #[error("Malformed JSON: {message}")]
    #[diagnostic(
        code(decode::malformed),
        help("The input is not valid JSON text; nothing was resolved.")
    )]
    Malformed {
        #[source_code]
        src: NamedSource<String>,
        #[label("{message}")]
        span: SourceSpan,
        message: String,
    },
}

#[derive(Error, Debug, Diagnostic)]
pub enum ResolveError {
    #[error("Failed to fetch external document `{url}`")]
    #[diagnostic(
        code(resolver::external_fetch),
        help("The document fetcher reported an error; it is passed through unchanged.")
    )]
    ExternalFetch {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("External document `{url}` could not be decoded")]
    #[diagnostic(code(resolver::external_decode))]
    ExternalDecode {
        url: String,
        #[source]
        #[diagnostic_source]
        source: DecodeError,
    },

    #[error("Loader failed to materialize `{reference}`")]
    #[diagnostic(code(resolver::load))]
    Load {
        reference: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("Invalid JSON configuration")]
    #[diagnostic(code(config::json))]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML configuration")]
    #[diagnostic(code(config::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to read `{path}`")]
    #[diagnostic(code(config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Diagnostic)]
pub enum FetchError {
    #[error("`{url}` points outside the document root")]
    #[diagnostic(
        code(fetch::outside_root),
        help("external documents must live under the fetcher's directory")
    )]
    OutsideRoot { url: String },
}
