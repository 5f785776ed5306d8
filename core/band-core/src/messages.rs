//! Spoken replies, one phrasebook per locale.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BandError, Rejection, TransportError};
use crate::router::{Operation, RouteError};
use crate::types::{Command, FieldKey};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Es,
}

/// How a field is announced: the lead-in for a value and the noun used when
/// the value is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPhrasing {
    pub success: &'static str,
    pub label: &'static str,
}

const EN_FIELDS: [(FieldKey, FieldPhrasing); 7] = [
    (
        FieldKey::HeartRate,
        FieldPhrasing {
            success: "The pulse is",
            label: "heart rate",
        },
    ),
    (
        FieldKey::ActivityType,
        FieldPhrasing {
            success: "The current activity is",
            label: "activity",
        },
    ),
    (
        FieldKey::AmbientTemperature,
        FieldPhrasing {
            success: "The ambient temperature is",
            label: "ambient temperature",
        },
    ),
    (
        FieldKey::Spo2,
        FieldPhrasing {
            success: "The blood oxygen level is",
            label: "blood oxygen",
        },
    ),
    (
        FieldKey::Steps,
        FieldPhrasing {
            success: "The step count is",
            label: "steps",
        },
    ),
    (
        FieldKey::MinPulseAlert,
        FieldPhrasing {
            success: "The minimum heart rate threshold is",
            label: "minimum heart rate threshold",
        },
    ),
    (
        FieldKey::MaxPulseAlert,
        FieldPhrasing {
            success: "The maximum heart rate threshold is",
            label: "maximum heart rate threshold",
        },
    ),
];

const ES_FIELDS: [(FieldKey, FieldPhrasing); 7] = [
    (
        FieldKey::HeartRate,
        FieldPhrasing {
            success: "El pulso es",
            label: "ritmo cardíaco",
        },
    ),
    (
        FieldKey::ActivityType,
        FieldPhrasing {
            success: "La actividad actual es",
            label: "actividad",
        },
    ),
    (
        FieldKey::AmbientTemperature,
        FieldPhrasing {
            success: "La temperatura del entorno es",
            label: "temperatura del entorno",
        },
    ),
    (
        FieldKey::Spo2,
        FieldPhrasing {
            success: "El nivel de oxígeno en la sangre es",
            label: "oxígeno en la sangre",
        },
    ),
    (
        FieldKey::Steps,
        FieldPhrasing {
            success: "El número de pasos es",
            label: "pasos",
        },
    ),
    (
        FieldKey::MinPulseAlert,
        FieldPhrasing {
            success: "El umbral mínimo de pulsaciones es",
            label: "umbral mínimo de pulsaciones",
        },
    ),
    (
        FieldKey::MaxPulseAlert,
        FieldPhrasing {
            success: "El umbral máximo de pulsaciones es",
            label: "umbral máximo de pulsaciones",
        },
    ),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Phrasebook {
    locale: Locale,
}

impl Phrasebook {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn field(&self, field: FieldKey) -> FieldPhrasing {
        let table = match self.locale {
            Locale::En => &EN_FIELDS,
            Locale::Es => &ES_FIELDS,
        };
        table
            .iter()
            .find(|(key, _)| *key == field)
            .map(|(_, phrasing)| *phrasing)
            .unwrap_or(FieldPhrasing {
                success: "",
                label: field.wire_key(),
            })
    }

    pub fn welcome(&self) -> String {
        match self.locale {
            Locale::En => "Welcome to your smart band. Please tell me your username to get started.",
            Locale::Es => "Bienvenido a tu banda inteligente. Por favor, dime tu nombre de usuario para empezar.",
        }
        .to_string()
    }

    pub fn greeting(&self, user: &str, nicknames: &[&str]) -> String {
        let list = nicknames.join(", ");
        match self.locale {
            Locale::En => format!(
                "Hello {}. You have the following devices registered: {}. Please tell me which device you want to use.",
                user, list
            ),
            Locale::Es => format!(
                "Hola {}. Tienes registrados los siguientes dispositivos: {}. Por favor, dime el nombre del dispositivo que deseas usar.",
                user, list
            ),
        }
    }

    pub fn device_selected(&self, nickname: &str) -> String {
        match self.locale {
            Locale::En => format!(
                "Great. You are now using the device {}. You can ask for your heart rate, SpO2, steps, or ambient temperature. What would you like to do?",
                nickname
            ),
            Locale::Es => format!(
                "Perfecto. Ahora estás usando el dispositivo {}. Puedes consultar tu ritmo cardíaco, SpO2, pasos, temperatura ambiente. ¿Qué deseas hacer?",
                nickname
            ),
        }
    }

    pub fn field_value(&self, field: FieldKey, value: &Value) -> String {
        format!("{}: {}.", self.field(field).success, render_value(value))
    }

    pub fn threshold_set(&self, field: FieldKey, value: i64) -> String {
        match (self.locale, field) {
            (Locale::En, FieldKey::MinPulseAlert) => {
                format!("The minimum heart rate threshold has been set to {}.", value)
            }
            (Locale::En, FieldKey::MaxPulseAlert) => {
                format!("The maximum heart rate threshold has been set to {}.", value)
            }
            (Locale::Es, FieldKey::MinPulseAlert) => {
                format!("El umbral mínimo de pulsaciones se ha establecido en {}.", value)
            }
            (Locale::Es, FieldKey::MaxPulseAlert) => {
                format!("El umbral máximo de pulsaciones se ha establecido en {}.", value)
            }
            (Locale::En, other) => {
                format!("{} has been set to {}.", self.field(other).label, value)
            }
            (Locale::Es, other) => {
                format!("{} se ha establecido en {}.", self.field(other).label, value)
            }
        }
    }

    pub fn rejection(&self, rejection: &Rejection) -> String {
        match (self.locale, rejection) {
            (Locale::En, Rejection::NoIdentity) => {
                "First you need to give me your username. Please tell me your name.".to_string()
            }
            (Locale::Es, Rejection::NoIdentity) => {
                "Primero debes proporcionar tu nombre de usuario. Por favor, dime tu nombre.".to_string()
            }
            (Locale::En, Rejection::NoDevice) => {
                "First you need to select a device. Please tell me the name of the device you want to use.".to_string()
            }
            (Locale::Es, Rejection::NoDevice) => {
                "Primero debes seleccionar un dispositivo. Por favor, dime el nombre del dispositivo que deseas usar.".to_string()
            }
            (Locale::En, Rejection::NoSuchUser { .. }) => {
                "I couldn't find any devices registered for this user. Please check your username.".to_string()
            }
            (Locale::Es, Rejection::NoSuchUser { .. }) => {
                "No encontré dispositivos registrados para este usuario. Por favor, verifica tu nombre de usuario.".to_string()
            }
            (Locale::En, Rejection::NoSuchDevice { nickname }) => {
                format!("I couldn't find a device called {}. Please try again.", nickname)
            }
            (Locale::Es, Rejection::NoSuchDevice { nickname }) => {
                format!("No encontré un dispositivo llamado {}. Por favor, intenta nuevamente.", nickname)
            }
            (Locale::En, Rejection::InvalidValue { raw, .. }) => {
                format!("{:?} is not a whole number. Please tell me the threshold as a number.", raw)
            }
            (Locale::Es, Rejection::InvalidValue { raw, .. }) => {
                format!("{:?} no es un número entero. Por favor, dime el umbral como un número.", raw)
            }
            (locale, Rejection::FieldUnavailable { field }) => {
                let label = FieldKey::from_wire_key(field)
                    .map(|key| Phrasebook::new(locale).field(key).label)
                    .unwrap_or(field.as_str());
                match locale {
                    Locale::En => format!("I couldn't get the {} information. Please try again.", label),
                    Locale::Es => format!("No se pudo obtener la información de {}. Intenta nuevamente.", label),
                }
            }
        }
    }

    /// Generic transient-failure reply; never includes store details.
    pub fn failure(&self, command: Option<&Command>, _failure: &TransportError) -> String {
        match (self.locale, command) {
            (Locale::En, Some(Command::WriteThreshold(FieldKey::MinPulseAlert, _))) => {
                "There was a problem setting the minimum threshold. Please try again later."
            }
            (Locale::En, Some(Command::WriteThreshold(FieldKey::MaxPulseAlert, _))) => {
                "There was a problem setting the maximum threshold. Please try again later."
            }
            (Locale::Es, Some(Command::WriteThreshold(FieldKey::MinPulseAlert, _))) => {
                "Hubo un problema al establecer el umbral mínimo. Por favor, intenta nuevamente más tarde."
            }
            (Locale::Es, Some(Command::WriteThreshold(FieldKey::MaxPulseAlert, _))) => {
                "Hubo un problema al establecer el umbral máximo. Por favor, intenta nuevamente más tarde."
            }
            (Locale::En, _) => {
                "There was a problem processing your request. Please try again later."
            }
            (Locale::Es, _) => {
                "Hubo un problema al procesar tu solicitud. Por favor, intenta nuevamente más tarde."
            }
        }
        .to_string()
    }

    pub fn error(&self, command: Option<&Command>, err: &BandError) -> String {
        match err {
            BandError::Rejected(rejection) => self.rejection(rejection),
            BandError::Failed(failure) => self.failure(command, failure),
        }
    }

    pub fn route_error(&self, err: &RouteError) -> String {
        match (self.locale, err) {
            (Locale::En, RouteError::MissingSlot { operation: Operation::IdentifyUser, .. }) => {
                "I didn't catch your username. Please tell me your name.".to_string()
            }
            (Locale::Es, RouteError::MissingSlot { operation: Operation::IdentifyUser, .. }) => {
                "No entendí tu nombre de usuario. Por favor, dime tu nombre.".to_string()
            }
            (Locale::En, RouteError::MissingSlot { .. }) => {
                "I didn't catch the device name. Please tell me which device you want to use.".to_string()
            }
            (Locale::Es, RouteError::MissingSlot { .. }) => {
                "No entendí el nombre del dispositivo. Por favor, dime qué dispositivo deseas usar.".to_string()
            }
            (Locale::En, RouteError::UnknownOperation(_)) => {
                "Sorry, I can't help with that. You can ask for your heart rate, activity, temperature, SpO2, or steps.".to_string()
            }
            (Locale::Es, RouteError::UnknownOperation(_)) => {
                "Lo siento, no puedo ayudarte con eso. Puedes consultar tu ritmo cardíaco, actividad, temperatura, SpO2 o pasos.".to_string()
            }
        }
    }

    pub fn goodbye(&self) -> String {
        match self.locale {
            Locale::En => "Goodbye.",
            Locale::Es => "Hasta luego.",
        }
        .to_string()
    }
}

/// Strings are spoken bare; everything else uses its JSON text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_field_has_phrasing_in_every_locale() {
        for locale in [Locale::En, Locale::Es] {
            let book = Phrasebook::new(locale);
            for field in FieldKey::ALL {
                let phrasing = book.field(field);
                assert!(!phrasing.success.is_empty(), "{:?} {:?}", locale, field);
                assert!(!phrasing.label.is_empty());
            }
        }
    }

    #[test]
    fn field_value_includes_rendered_value() {
        let en = Phrasebook::new(Locale::En);
        assert_eq!(en.field_value(FieldKey::HeartRate, &json!(72)), "The pulse is: 72.");
        assert_eq!(
            en.field_value(FieldKey::ActivityType, &json!("walking")),
            "The current activity is: walking."
        );

        let es = Phrasebook::new(Locale::Es);
        assert_eq!(es.field_value(FieldKey::HeartRate, &json!(72)), "El pulso es: 72.");
    }

    #[test]
    fn failure_text_hides_transport_detail() {
        let book = Phrasebook::new(Locale::En);
        let failure = TransportError::Store {
            operation: "read_field",
            device_key: "smartband_SN-1".to_string(),
            phase: crate::shadow::Phase::ReportedRead,
            detail: "secret payload".to_string(),
        };
        let text = book.failure(Some(&Command::ReadField(FieldKey::Steps)), &failure);
        assert!(!text.contains("secret"));
        assert!(!text.contains("smartband_SN-1"));
    }

    #[test]
    fn threshold_failure_names_which_threshold() {
        let book = Phrasebook::new(Locale::Es);
        let failure = TransportError::DeadlineExceeded {
            operation: "write_threshold",
            elapsed_ms: 9000,
        };
        let text = book.failure(
            Some(&Command::WriteThreshold(FieldKey::MaxPulseAlert, "150".to_string())),
            &failure,
        );
        assert!(text.contains("umbral máximo"));
    }

    #[test]
    fn greeting_lists_nicknames() {
        let text = Phrasebook::new(Locale::En).greeting("ana", &["band1", "band2"]);
        assert!(text.contains("band1, band2"));
    }

    #[test]
    fn field_unavailable_uses_label() {
        let text = Phrasebook::new(Locale::En).rejection(&Rejection::FieldUnavailable {
            field: "enviroment_temperature".to_string(),
        });
        assert!(text.contains("ambient temperature"));
    }
}
