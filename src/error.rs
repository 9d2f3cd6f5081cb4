use std::fmt;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Custom error type for parkwise operations
/// Implements Clone so failures can be recorded on request state
/// and sent through reply channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// No backend could be constructed
    ProviderUnavailable(String)
  , /// An explicitly requested backend failed to construct
    ProviderInit
    {   backend: String
      , cause: String
    }
  , /// A single generation call against a backend failed
    Generation
    {   backend: String
      , cause: String
    }
  , /// Model output could not be decoded into the stage schema
    Decode(String)
  , /// Neither a named location nor user coordinates resolved
    LocationRequired
  , /// No API key for a remote endpoint
    MissingApiKey(String)
  , /// No local accelerator for the GPU-batch backend
    AcceleratorNotFound
  , /// Model file or served model is missing
    ModelNotFound(String)
  , /// HTTP request error
    HttpError(String)
  , /// API returned an error response
    ApiError(String)
  , /// Failed to parse API response
    ParseError(String)
  , /// No choices in API response
    NoChoicesInResponse
  , /// Invalid configuration
    InvalidConfiguration(String)
  , /// Timeout error
    Timeout
  , /// Generic error
    Other(String)
}

impl Error
{   /// Wrap any failure raised while talking to `backend`
    pub fn generation(
      backend: &str
    , cause: impl fmt::Display
    ) -> Self
    {   Error::Generation
        {   backend: backend.to_string()
          , cause: cause.to_string()
        }
    }
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::ProviderUnavailable(msg) => {
              write!(f, "No LLM provider available: {}", msg)
            }
          , Error::ProviderInit { backend, cause } => {
              write!(f,
                "Failed to initialize {} provider: {}",
                backend, cause
              )
            }
          , Error::Generation { backend, cause } => {
              write!(f,
                "Generation failed on {}: {}",
                backend, cause
              )
            }
          , Error::Decode(msg) => {
              write!(f, "Could not decode model output: {}", msg)
            }
          , Error::LocationRequired => {
              write!(f,
                "Location required: could not determine search \
                 location. Please specify a location or enable \
                 location services."
              )
            }
          , Error::MissingApiKey(endpoint) => {
              write!(f, "Missing API key for {}", endpoint)
            }
          , Error::AcceleratorNotFound => {
              write!(f, "No GPU accelerator detected")
            }
          , Error::ModelNotFound(model) => {
              write!(f, "Model not found: {}", model)
            }
          , Error::HttpError(msg) => {
              write!(f, "HTTP error: {}", msg)
            }
          , Error::ApiError(msg) => {
              write!(f, "API error: {}", msg)
            }
          , Error::ParseError(msg) => {
              write!(f, "Parse error: {}", msg)
            }
          , Error::NoChoicesInResponse => {
              write!(f, "API response contained no choices")
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::Timeout => {
              write!(f, "Request timed out")
            }
          , Error::Other(msg) => {
              write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error
{   fn from(e: reqwest::Error) -> Self
    {   if e.is_timeout()
        {   Error::Timeout
        } else
        {   Error::HttpError(e.to_string())
        }
    }
}
