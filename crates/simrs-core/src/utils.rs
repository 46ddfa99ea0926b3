//! 通用工具函数

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::{Result, SimrsError};

/// 病历号，例如 RM2026000123
pub fn format_medical_record_number(year: i32, sequence: i64) -> String {
    format!("RM{:04}{:06}", year, sequence)
}

/// 号票编码，例如 PU-007
pub fn format_ticket_code(prefix: &str, number: i32) -> String {
    format!("{}-{:03}", prefix, number)
}

/// 由UTC小时偏移构造时区，例如 WIB 为 +7
pub fn fixed_offset(hours: i32) -> Result<FixedOffset> {
    if !(-14..=14).contains(&hours) {
        return Err(SimrsError::Config(format!("utc offset {}h out of range", hours)));
    }
    FixedOffset::east_opt(hours * 3600)
        .ok_or_else(|| SimrsError::Config(format!("invalid utc offset {}h", hours)))
}

/// 某一时刻在医院当地时区的日期
pub fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// 某一时刻在医院当地时区的钟点
pub fn local_time(at: DateTime<Utc>, offset: FixedOffset) -> NaiveTime {
    at.with_timezone(&offset).time()
}

/// 校验身份证号 (NIK)：16位数字
pub fn is_valid_nik(nik: &str) -> bool {
    nik.len() == 16 && nik.chars().all(|c| c.is_ascii_digit())
}

/// 校验科室编码：1-6位大写字母或数字
pub fn is_valid_polyclinic_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= 6
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// 分页参数归一化
pub fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

/// 去除首尾空白，空串视为缺省
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_codes() {
        assert_eq!(format_medical_record_number(2026, 123), "RM2026000123");
        assert_eq!(format_ticket_code("PU", 7), "PU-007");
        assert_eq!(format_ticket_code("GIGI", 1234), "GIGI-1234");
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        let wib = fixed_offset(7).unwrap();
        // 2026-03-01 18:30 UTC 是雅加达时间 3月2日 01:30
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap();
        assert_eq!(local_date(at, wib), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(local_time(at, wib), NaiveTime::from_hms_opt(1, 30, 0).unwrap());
        assert!(fixed_offset(15).is_err());
    }

    #[test]
    fn test_validators() {
        assert!(is_valid_nik("3174012501900001"));
        assert!(!is_valid_nik("31740125019000"));
        assert!(!is_valid_nik("317401250190000A"));
        assert!(is_valid_polyclinic_code("PU"));
        assert!(!is_valid_polyclinic_code("pu"));
        assert!(!is_valid_polyclinic_code("TOOLONG"));
        assert_eq!(clamp_limit(None, 50, 200), 50);
        assert_eq!(clamp_limit(Some(1000), 50, 200), 200);
        assert_eq!(non_blank(Some("  ".into())), None);
    }
}
