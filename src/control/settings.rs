//! Typed payloads of the control protocol groups.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use typed_builder::TypedBuilder;

/// Control protocol groups that can be queried with `get`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Rx,
    RxData,
    RxStat,
    Master,
    Gps,
}

impl Group {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Group::Rx => "rx",
            Group::RxData => "rxdata",
            Group::RxStat => "rxstat",
            Group::Master => "master",
            Group::Gps => "gps",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Tcp,
}

/// `rxdata` group: the daemon's receive data connection.
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, Default, PartialEq, Eq)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
pub struct RxDataSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub con_enable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub con_type: Option<ConnectionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub con_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_v49: Option<bool>,
}

impl RxDataSettings {
    /// Data flow stopped and the data connection disabled.
    #[must_use]
    pub fn idle() -> Self {
        Self::builder().run(false).con_enable(false).build()
    }
}

/// `rx` group: receiver tuning.
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, Default, PartialEq)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
pub struct RxSettings {
    #[serde(skip_serializing_if = "Option::is_none", alias = "SampleRate")]
    pub sample_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "Freq")]
    pub freq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "Gain")]
    pub gain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "GainMode")]
    pub gain_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "StartMode")]
    pub start_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "LBMode")]
    pub lb_mode: Option<String>,
}

/// `rxstat` group: receiver status counters.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RxStatus {
    #[serde(rename = "Gain", alias = "gain", default)]
    pub gain: Option<f64>,
    #[serde(rename = "Overflow", alias = "overflow", default)]
    pub overflow: Option<u64>,
    #[serde(rename = "Rate", alias = "rate", default)]
    pub rate: Option<f64>,
    /// Samples produced since the receiver was started.
    #[serde(rename = "Sample", alias = "sample", default)]
    pub sample: Option<u64>,
}

/// `gps` group, passed through as reported.
pub type GpsInfo = Map<String, Value>;

/// Payload of a `set` request, a mapping of group to settings.
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, Default, PartialEq)]
#[builder(field_defaults(default, setter(strip_option)))]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rxdata: Option<RxDataSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx: Option<RxSettings>,
}

impl Settings {
    /// Names of the groups present, for logging.
    #[must_use]
    pub fn groups(&self) -> Vec<&'static str> {
        let mut groups = Vec::new();
        if self.rxdata.is_some() {
            groups.push(Group::RxData.name());
        }
        if self.rx.is_some() {
            groups.push(Group::Rx.name());
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rxdata_serializes_only_set_fields() {
        let settings = RxDataSettings::builder()
            .con_enable(false)
            .run(false)
            .con_type(ConnectionType::Tcp)
            .con_port(12701)
            .use_v49(true)
            .build();

        assert_eq!(
            serde_json::to_value(&settings).unwrap(),
            json!({
                "run": false,
                "conEnable": false,
                "conType": "tcp",
                "conPort": 12701,
                "useV49": true,
            })
        );
        assert_eq!(
            serde_json::to_value(RxDataSettings::builder().run(true).build()).unwrap(),
            json!({"run": true})
        );
    }

    #[test]
    fn test_settings_groups() {
        let settings = Settings::builder()
            .rxdata(RxDataSettings::idle())
            .rx(RxSettings::builder().freq(1e9).sample_rate(2e6).build())
            .build();

        assert_eq!(settings.groups(), vec!["rxdata", "rx"]);
        assert_eq!(
            serde_json::to_value(&settings).unwrap(),
            json!({
                "rxdata": {"run": false, "conEnable": false},
                "rx": {"sampleRate": 2e6, "freq": 1e9},
            })
        );
    }

    #[test]
    fn test_rx_from_daemon() {
        let rx: RxSettings = serde_json::from_value(json!({
            "SampleRate": 1e6,
            "freq": 915e6,
            "GainMode": "SlowAGC",
            "unknown": 1,
        }))
        .unwrap();

        assert_eq!(rx.sample_rate, Some(1e6));
        assert_eq!(rx.freq, Some(915e6));
        assert_eq!(rx.gain_mode.as_deref(), Some("SlowAGC"));
        assert_eq!(rx.gain, None);
    }

    #[test]
    fn test_rxstat_from_daemon() {
        let stat: RxStatus = serde_json::from_value(json!({
            "Gain": 20.5,
            "Overflow": 3,
            "Rate": 2e6,
            "Sample": 123456789,
        }))
        .unwrap();

        assert_eq!(stat.gain, Some(20.5));
        assert_eq!(stat.overflow, Some(3));
        assert_eq!(stat.rate, Some(2e6));
        assert_eq!(stat.sample, Some(123_456_789));

        let stat: RxStatus = serde_json::from_value(json!({})).unwrap();
        assert_eq!(stat, RxStatus::default());
    }
}
