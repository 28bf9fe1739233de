//! XML response shapes for the upstream weather-warning API, and their
//! conversion into [`WarningEvent`].

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use fc_common::event::ActionCode;
use fc_common::WarningEvent;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct Response {
    pub header: Header,
    pub body: Option<Body>,
}

#[derive(Debug, Deserialize)]
pub struct Header {
    #[serde(rename = "resultCode")]
    pub result_code: String,
    #[serde(rename = "resultMsg", default)]
    pub result_msg: String,
}

#[derive(Debug, Deserialize)]
pub struct Body {
    pub items: Option<Items>,
    #[serde(rename = "pageNo", default)]
    pub page_no: u32,
    #[serde(rename = "numOfRows", default)]
    pub num_of_rows: u32,
    #[serde(rename = "totalCount", default)]
    pub total_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct Items {
    #[serde(rename = "item", default)]
    pub item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
pub struct Item {
    #[serde(rename = "regId")]
    pub reg_id: String,
    #[serde(rename = "regName", default)]
    pub reg_name: Option<String>,
    #[serde(rename = "wrnId", default)]
    pub wrn_id: String,
    #[serde(rename = "lvl", default)]
    pub lvl: String,
    #[serde(rename = "cmd", default)]
    pub cmd: String,
    #[serde(rename = "tmFc", default)]
    pub tm_fc: Option<String>,
    #[serde(rename = "tmEf", default)]
    pub tm_ef: Option<String>,
    #[serde(rename = "tmEx", default)]
    pub tm_ex: Option<String>,
    #[serde(rename = "stnId", default)]
    pub stn_id: Option<String>,
    #[serde(rename = "tmSeq", default)]
    pub tm_seq: Option<u32>,
}

/// Upstream result codes.
pub const RESULT_OK: &[&str] = &["00", "0"];
pub const RESULT_NODATA: &str = "03";
pub const RESULT_RATE_LIMIT: &str = "22";

fn parse_kma_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn action_code(cmd: &str) -> ActionCode {
    match cmd {
        "1" => ActionCode::Announce,
        "2" => ActionCode::Continue,
        "3" => ActionCode::Update,
        "4" => ActionCode::Release,
        _ => ActionCode::Announce,
    }
}

impl Item {
    pub fn into_warning_event(self, region_map: &HashMap<String, String>) -> WarningEvent {
        let region_name = fc_common::event::resolve_region_name(
            &self.reg_id,
            self.reg_name.as_deref(),
            region_map,
        );
        let action_code = action_code(&self.cmd);
        WarningEvent {
            region_code: self.reg_id,
            region_name,
            kind_code: self.wrn_id,
            level_code: self.lvl,
            action_code,
            cancel_flag: self.cmd == "4",
            start_time: self.tm_ef.as_deref().and_then(parse_kma_timestamp),
            end_time: self.tm_ex.as_deref().and_then(parse_kma_timestamp),
            announce_time: self.tm_fc.as_deref().and_then(parse_kma_timestamp),
            station_id: self.stn_id,
            announce_seq: self.tm_seq,
            report_url: None,
        }
    }
}
