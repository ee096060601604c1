//! Offline classifier used when no validation servers are available.
//!
//! It never touches the network: MX and SMTP results are reported as not performed, except for
//! reserved domains that can never receive mail.

use async_trait::async_trait;

use super::{CheckError, CheckOptions, CheckOutcome, Checks, EmailChecker, syntax};
use crate::jobs::types::Verdict;

const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "guerrillamail.com",
    "10minutemail.com",
    "tempmail.com",
    "temp-mail.org",
    "yopmail.com",
    "trashmail.com",
    "getnada.com",
    "sharklasers.com",
    "dispostable.com",
];

const ROLE_ACCOUNTS: &[&str] = &[
    "admin",
    "administrator",
    "billing",
    "contact",
    "help",
    "hello",
    "info",
    "marketing",
    "noreply",
    "no-reply",
    "postmaster",
    "sales",
    "support",
    "webmaster",
    "abuse",
];

/// TLDs reserved by RFC 2606 and RFC 6761
const RESERVED_TLDS: &[&str] = &["test", "example", "invalid", "localhost"];

#[derive(Debug, Clone, Default)]
pub struct LocalEmailChecker;

impl LocalEmailChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(email: &str) -> CheckOutcome {
        let Some((local, domain)) = syntax::split(email).filter(|_| syntax::is_valid(email)) else {
            return CheckOutcome {
                verdict: Verdict::Invalid,
                score: 0,
                checks: Checks::default(),
            };
        };
        let domain = domain.to_ascii_lowercase();
        let local = local.to_ascii_lowercase();
        let tld = domain.rsplit('.').next().unwrap_or_default();

        let mut checks = Checks {
            syntax: true,
            disposable: DISPOSABLE_DOMAINS.contains(&domain.as_str()),
            role_based: ROLE_ACCOUNTS.contains(&local.split('+').next().unwrap_or_default()),
            ..Default::default()
        };

        let (verdict, score) = if RESERVED_TLDS.contains(&tld) || domain == "example.com" {
            checks.mx_found = Some(false);
            (Verdict::Invalid, 5)
        } else if checks.disposable {
            (Verdict::Disposable, 20)
        } else if checks.role_based {
            (Verdict::RoleBased, 60)
        } else {
            (Verdict::Valid, 80)
        };
        CheckOutcome { verdict, score, checks }
    }
}

#[async_trait]
impl EmailChecker for LocalEmailChecker {
    async fn check(&self, email: &str, _options: &CheckOptions) -> Result<CheckOutcome, CheckError> {
        Ok(Self::classify(email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_classification() {
        let checker = LocalEmailChecker::new();
        let options = CheckOptions::default();
        let verdict = |email: &'static str| {
            let checker = checker.clone();
            async move { checker.check(email, &options).await.unwrap().verdict }
        };

        assert_eq!(verdict("jane@company.io").await, Verdict::Valid);
        assert_eq!(verdict("not-an-email").await, Verdict::Invalid);
        assert_eq!(verdict("someone@mailinator.com").await, Verdict::Disposable);
        assert_eq!(verdict("Support@company.io").await, Verdict::RoleBased);
        assert_eq!(verdict("info+list@company.io").await, Verdict::RoleBased);
        assert_eq!(verdict("user@domain.test").await, Verdict::Invalid);
    }

    #[test]
    fn test_checks_reflect_verdict() {
        let outcome = LocalEmailChecker::classify("nobody@mailinator.com");
        assert!(outcome.checks.syntax);
        assert!(outcome.checks.disposable);
        assert_eq!(outcome.checks.smtp_valid, None);

        let outcome = LocalEmailChecker::classify("broken@");
        assert!(!outcome.checks.syntax);
        assert_eq!(outcome.score, 0);
    }
}
