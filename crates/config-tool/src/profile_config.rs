use serde::{Deserialize, Serialize};

use mediatranslation_client::credentials::Credentials;
use mediatranslation_client::grpc::{StreamingTranslateSpeechConfig, TranslateSpeechConfig};
use mediatranslation_client::ClientOptions;

fn default_audio_encoding() -> String {
    "linear16".to_string()
}

const fn default_sample_rate_hertz() -> i32 {
    16000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub source_language_code: String,
    pub target_language_code: String,
    #[serde(default = "default_audio_encoding")]
    pub audio_encoding: String,
    #[serde(default = "default_sample_rate_hertz")]
    pub sample_rate_hertz: i32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub single_utterance: bool,
    /// A pre-minted OAuth access token; wins over any key file.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub client: ClientOptions,
}

impl ProfileConfig {
    #[must_use]
    pub fn to_streaming_config(&self) -> StreamingTranslateSpeechConfig {
        StreamingTranslateSpeechConfig {
            audio_config: Some(TranslateSpeechConfig {
                audio_encoding: self.audio_encoding.clone(),
                source_language_code: self.source_language_code.clone(),
                target_language_code: self.target_language_code.clone(),
                sample_rate_hertz: self.sample_rate_hertz,
                model: self.model.clone().unwrap_or_default(),
            }),
            single_utterance: self.single_utterance,
        }
    }

    /// Explicit credentials of this profile, if any.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.access_token.clone().map(Credentials::AccessToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_audio_settings() {
        let profile: ProfileConfig = toml::from_str(
            r#"
            source_language_code = "en-US"
            target_language_code = "fr-FR"
            "#,
        )
        .unwrap();

        let config = profile.to_streaming_config();
        let audio = config.audio_config.unwrap();
        assert_eq!(audio.audio_encoding, "linear16");
        assert_eq!(audio.sample_rate_hertz, 16000);
        assert_eq!(audio.model, "");
        assert!(!config.single_utterance);
        assert!(profile.credentials().is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = toml::from_str::<ProfileConfig>(
            r#"
            source_language_code = "en-US"
            target_language_code = "fr-FR"
            target_langauge = "de-DE"
            "#,
        );
        assert!(result.is_err());
    }
}
