//! HMAC-SHA256 请求签名校验
//!
//! 未配置共享密钥时放行所有请求；配置后要求 `X-Signature`（或 `X-Hub-Signature`）
//! 头携带 `sha256=<hex>` 或裸 hex 形式的签名，签名对象为原始请求体字节。

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// 主签名头
pub const SIGNATURE_HEADER: &str = "X-Signature";
/// 兼容签名头
pub const HUB_SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// 请求头集合，按名称大小写不敏感查找
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    entries: Vec<(String, String)>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 是否携带任一签名头
    pub fn has_signature(&self) -> bool {
        self.signature().is_some()
    }

    /// 空值的签名头视为未提供
    fn signature(&self) -> Option<&str> {
        let present = |name| self.get(name).map(str::trim).filter(|v| !v.is_empty());
        present(SIGNATURE_HEADER).or_else(|| present(HUB_SIGNATURE_HEADER))
    }
}

/// 签名校验器
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    secret: Option<String>,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>) -> Self {
        // 空字符串等同于未配置
        let secret = secret.filter(|s| !s.is_empty());
        Self { secret }
    }

    /// 是否启用签名校验
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// 校验请求体签名
    pub fn verify(&self, headers: &RequestHeaders, body: &[u8]) -> bool {
        let Some(secret) = &self.secret else {
            return true;
        };

        let Some(header) = headers.signature() else {
            warn!("Missing signature header for IAN/MPPS request");
            return false;
        };

        let hex_sig = header.strip_prefix("sha256=").unwrap_or(header).trim();
        let Ok(expected) = hex::decode(hex_sig) else {
            warn!("Invalid signature for IAN/MPPS request: malformed hex");
            return false;
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            warn!("Invalid signature for IAN/MPPS request: unusable secret");
            return false;
        };
        mac.update(body);

        // verify_slice 为常量时间比较
        let valid = mac.verify_slice(&expected).is_ok();
        if !valid {
            warn!("Invalid signature for IAN/MPPS request");
        }
        valid
    }

    /// 生成 `sha256=<hex>` 签名，未配置密钥时返回 None
    pub fn sign(&self, body: &[u8]) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(body);
        Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"ian_id":"IAN-20251114-0001"}"#;

    #[test]
    fn test_no_secret_always_passes() {
        let verifier = SignatureVerifier::new(None);
        assert!(verifier.verify(&RequestHeaders::new(), BODY));
        assert!(verifier.verify(&RequestHeaders::new().with("X-Signature", "garbage"), BODY));

        let empty = SignatureVerifier::new(Some(String::new()));
        assert!(!empty.is_enabled());
        assert!(empty.verify(&RequestHeaders::new(), BODY));
    }

    #[test]
    fn test_matching_signature_passes() {
        let verifier = SignatureVerifier::new(Some("s3cret".to_string()));
        let sig = verifier.sign(BODY).unwrap();
        assert!(sig.starts_with("sha256="));

        assert!(verifier.verify(&RequestHeaders::new().with("X-Signature", &sig), BODY));

        // 裸 hex 与兼容头
        let raw = sig.trim_start_matches("sha256=").to_string();
        assert!(verifier.verify(&RequestHeaders::new().with("x-hub-signature", &raw), BODY));
    }

    #[test]
    fn test_empty_primary_header_falls_back_to_hub_signature() {
        let verifier = SignatureVerifier::new(Some("s3cret".to_string()));
        let sig = verifier.sign(BODY).unwrap();

        let headers = RequestHeaders::new()
            .with("X-Signature", "")
            .with("X-Hub-Signature", &sig);
        assert!(headers.has_signature());
        assert!(verifier.verify(&headers, BODY));

        let blank = RequestHeaders::new().with("X-Signature", "  ");
        assert!(!blank.has_signature());
        assert!(!verifier.verify(&blank, BODY));
    }

    #[test]
    fn test_single_byte_mutation_fails() {
        let verifier = SignatureVerifier::new(Some("s3cret".to_string()));
        let sig = verifier.sign(BODY).unwrap();
        let headers = RequestHeaders::new().with("X-Signature", &sig);

        for i in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[i] ^= 0x01;
            assert!(!verifier.verify(&headers, &mutated), "mutation at byte {} passed", i);
        }
    }

    #[test]
    fn test_missing_or_malformed_header_fails() {
        let verifier = SignatureVerifier::new(Some("s3cret".to_string()));
        assert!(!verifier.verify(&RequestHeaders::new(), BODY));
        assert!(!verifier.verify(&RequestHeaders::new().with("X-Signature", "sha256=zz"), BODY));
    }

    #[test]
    fn test_signature_from_other_secret_fails() {
        let ours = SignatureVerifier::new(Some("s3cret".to_string()));
        let theirs = SignatureVerifier::new(Some("other".to_string()));
        let sig = theirs.sign(BODY).unwrap();
        assert!(!ours.verify(&RequestHeaders::new().with("X-Signature", &sig), BODY));
    }
}
