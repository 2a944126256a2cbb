//! Heuristic identity matching between local contacts/contracts and
//! remote provider records. Absence of a match is a normal outcome here,
//! never an error.

use log::{debug, info};
use unicode_normalization::UnicodeNormalization;

use crate::billing::vindi::{CustomerSearchField, VindiBill, VindiClient, VindiCustomer, VindiError, VindiSubscription};
use crate::signature::clicksign::Envelope;

/// Minimum digit counts before registry code / phone are worth searching;
/// shorter values produce junk matches on the provider side.
const MIN_REGISTRY_DIGITS: usize = 11;
const MIN_PHONE_DIGITS: usize = 10;

/// Lowercases and strips diacritics so "José Álvares" and "jose alvares"
/// compare equal.
pub fn normalize(s: &str) -> String {
    s.nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Local contact attributes the matcher works from.
#[derive(Debug, Clone)]
pub struct ContactQuery {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub registry_code: Option<String>,
}

/// Ordered list of (strategy, search value) pairs for a contact. The order
/// is the cascade order; ineligible attributes are left out.
pub fn customer_search_plan(query: &ContactQuery) -> Vec<(CustomerSearchField, String)> {
    let mut plan = Vec::new();

    if let Some(email) = query.email.as_deref() {
        if !email.trim().is_empty() {
            plan.push((CustomerSearchField::Email, email.trim().to_string()));
        }
    }

    if let Some(registry) = query.registry_code.as_deref() {
        let digits = digits_only(registry);
        if digits.len() >= MIN_REGISTRY_DIGITS {
            plan.push((CustomerSearchField::RegistryCode, digits));
        }
    }

    if !query.full_name.trim().is_empty() {
        plan.push((CustomerSearchField::Name, query.full_name.trim().to_string()));
    }

    if let Some(phone) = query.phone.as_deref() {
        let digits = digits_only(phone);
        if digits.len() >= MIN_PHONE_DIGITS {
            plan.push((CustomerSearchField::Phone, digits));
        }
    }

    plan
}

#[derive(Debug, Clone)]
pub struct CustomerMatch {
    pub customer: VindiCustomer,
    pub strategy: CustomerSearchField,
}

/// Runs the search plan against a lookup function, short-circuiting at the
/// first strategy that returns any customer. Generic over the lookup so
/// the cascade order is testable without a live client.
pub async fn run_customer_cascade<F, Fut>(
    plan: Vec<(CustomerSearchField, String)>,
    mut search: F,
) -> Result<Option<CustomerMatch>, VindiError>
where
    F: FnMut(CustomerSearchField, String) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<VindiCustomer>, VindiError>>,
{
    for (strategy, value) in plan {
        let mut customers = search(strategy, value).await?;
        if let Some(customer) = customers.drain(..).next() {
            debug!("Customer matched via {:?}", strategy);
            return Ok(Some(CustomerMatch { customer, strategy }));
        };
    }
    Ok(None)
}

pub async fn find_customer(
    client: &VindiClient,
    query: &ContactQuery,
) -> Result<Option<CustomerMatch>, VindiError> {
    let plan = customer_search_plan(query);
    run_customer_cascade(plan, |field, value| async move {
        client.search_customers(field, &value).await
    })
    .await
}

/// Billing linkage resolved for a matched customer: prefer an active
/// subscription, fall back to the most recent bill of any status.
#[derive(Debug, Clone, Default)]
pub struct BillingLinkage {
    pub subscription: Option<VindiSubscription>,
    pub bill: Option<VindiBill>,
}

pub async fn resolve_billing_linkage(
    client: &VindiClient,
    customer_id: i64,
) -> Result<BillingLinkage, VindiError> {
    if let Some(subscription) = client.find_subscription(customer_id).await? {
        return Ok(BillingLinkage {
            subscription: Some(subscription),
            bill: None,
        });
    }

    let bill = client.find_latest_bill(customer_id).await?;
    if bill.is_none() {
        info!("Customer {customer_id} has no subscription and no bills");
    }
    Ok(BillingLinkage {
        subscription: None,
        bill,
    })
}

/// True when the normalized envelope name contains the full normalized
/// contact name, or both the first and last name tokens (for names with at
/// least two tokens of length >= 2).
pub fn envelope_name_matches(contact_name: &str, envelope_name: &str) -> bool {
    let envelope = normalize(envelope_name);
    let name = normalize(contact_name);

    if name.is_empty() {
        return false;
    }
    if envelope.contains(&name) {
        return true;
    }

    let tokens: Vec<&str> = name.split_whitespace().filter(|t| t.len() >= 2).collect();
    if tokens.len() >= 2 {
        let first = tokens[0];
        let last = tokens[tokens.len() - 1];
        return envelope.contains(first) && envelope.contains(last);
    }

    false
}

fn most_recent<'a>(envelopes: Vec<&'a Envelope>) -> Option<&'a Envelope> {
    // ISO timestamps order lexicographically, so a plain string max works.
    envelopes
        .into_iter()
        .max_by(|a, b| a.created_at.as_deref().unwrap_or("").cmp(b.created_at.as_deref().unwrap_or("")))
}

/// Finds the most recent termination ("distrato") envelope for a contact.
pub fn find_distrato_envelope<'a>(
    contact_name: &str,
    envelopes: &'a [Envelope],
) -> Option<&'a Envelope> {
    let matches: Vec<&Envelope> = envelopes
        .iter()
        .filter(|e| normalize(&e.name).contains("distrato"))
        .filter(|e| envelope_name_matches(contact_name, &e.name))
        .collect();
    most_recent(matches)
}

/// Finds the most recent contract envelope for a contact, skipping
/// termination documents. Used by the linkage backfill to acquire the
/// signature document key.
pub fn find_contract_envelope<'a>(
    contact_name: &str,
    envelopes: &'a [Envelope],
) -> Option<&'a Envelope> {
    let matches: Vec<&Envelope> = envelopes
        .iter()
        .filter(|e| !normalize(&e.name).contains("distrato"))
        .filter(|e| envelope_name_matches(contact_name, &e.name))
        .collect();
    most_recent(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(key: &str, name: &str, created_at: &str) -> Envelope {
        Envelope {
            key: key.to_string(),
            name: name.to_string(),
            status: "closed".to_string(),
            created_at: Some(created_at.to_string()),
            updated_at: Some(created_at.to_string()),
        }
    }

    #[test]
    fn normalize_strips_diacritics_and_case() {
        assert_eq!(normalize("José Álvares Neto"), "jose alvares neto");
        assert_eq!(normalize("ção ÃÉÍÕÜ"), "cao aeiou");
    }

    #[test]
    fn digits_only_drops_formatting() {
        assert_eq!(digits_only("+55 (11) 98765-4321"), "5511987654321");
        assert_eq!(digits_only("123.456.789-09"), "12345678909");
    }

    #[test]
    fn search_plan_follows_cascade_order() {
        let query = ContactQuery {
            full_name: "Maria Silva".to_string(),
            email: Some("maria@example.com".to_string()),
            phone: Some("(11) 98765-4321".to_string()),
            registry_code: Some("123.456.789-09".to_string()),
        };
        let plan = customer_search_plan(&query);
        let fields: Vec<CustomerSearchField> = plan.iter().map(|(f, _)| *f).collect();
        assert_eq!(
            fields,
            vec![
                CustomerSearchField::Email,
                CustomerSearchField::RegistryCode,
                CustomerSearchField::Name,
                CustomerSearchField::Phone,
            ]
        );
    }

    #[test]
    fn search_plan_skips_short_registry_and_phone() {
        let query = ContactQuery {
            full_name: "Maria Silva".to_string(),
            email: None,
            phone: Some("4321".to_string()),
            registry_code: Some("123".to_string()),
        };
        let plan = customer_search_plan(&query);
        let fields: Vec<CustomerSearchField> = plan.iter().map(|(f, _)| *f).collect();
        assert_eq!(fields, vec![CustomerSearchField::Name]);
    }

    #[tokio::test]
    async fn cascade_stops_at_first_hit() {
        let query = ContactQuery {
            full_name: "Maria Silva".to_string(),
            email: Some("maria@example.com".to_string()),
            phone: None,
            registry_code: None,
        };

        // Both the email and the name would match, at different customers.
        let result = run_customer_cascade(customer_search_plan(&query), |field, _value| async move {
            match field {
                CustomerSearchField::Email => Ok(vec![VindiCustomer {
                    id: 1,
                    name: Some("Maria Silva".to_string()),
                    email: Some("maria@example.com".to_string()),
                    registry_code: None,
                    phones: None,
                    created_at: None,
                }]),
                CustomerSearchField::Name => Ok(vec![VindiCustomer {
                    id: 2,
                    name: Some("Maria Silva".to_string()),
                    email: None,
                    registry_code: None,
                    phones: None,
                    created_at: None,
                }]),
                _ => Ok(vec![]),
            }
        })
        .await
        .unwrap();

        let hit = result.expect("cascade should match");
        assert_eq!(hit.customer.id, 1);
        assert_eq!(hit.strategy, CustomerSearchField::Email);
    }

    #[tokio::test]
    async fn cascade_exhaustion_is_none_not_error() {
        let query = ContactQuery {
            full_name: "Maria Silva".to_string(),
            email: Some("maria@example.com".to_string()),
            phone: None,
            registry_code: None,
        };
        let result = run_customer_cascade(customer_search_plan(&query), |_field, _value| async move {
            Ok(vec![])
        })
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn accented_name_matches_plain_envelope() {
        assert!(envelope_name_matches(
            "José Álvares Neto",
            "DISTRATO - Jose Alvares Neto - 2024"
        ));
    }

    #[test]
    fn first_and_last_token_match() {
        // Middle name missing from the envelope still counts.
        assert!(envelope_name_matches(
            "Maria Fernanda Souza",
            "Distrato Maria Souza"
        ));
        assert!(!envelope_name_matches("Maria Fernanda Souza", "Distrato Joao Lima"));
    }

    #[test]
    fn distrato_required_for_cancellation_match() {
        let envelopes = vec![
            envelope("a", "Contrato - Jose Alvares Neto", "2024-01-01T00:00:00Z"),
            envelope("b", "DISTRATO - Jose Alvares Neto", "2024-03-01T00:00:00Z"),
        ];
        let found = find_distrato_envelope("José Álvares Neto", &envelopes).unwrap();
        assert_eq!(found.key, "b");
    }

    #[test]
    fn most_recent_distrato_wins() {
        let envelopes = vec![
            envelope("old", "Distrato Jose Alvares Neto", "2023-05-01T00:00:00Z"),
            envelope("new", "Distrato Jose Alvares Neto v2", "2024-02-01T00:00:00Z"),
        ];
        let found = find_distrato_envelope("Jose Alvares Neto", &envelopes).unwrap();
        assert_eq!(found.key, "new");
    }

    #[test]
    fn contract_envelope_skips_distratos() {
        let envelopes = vec![
            envelope("c", "Contrato Maria Souza", "2024-01-01T00:00:00Z"),
            envelope("d", "Distrato Maria Souza", "2024-02-01T00:00:00Z"),
        ];
        let found = find_contract_envelope("Maria Souza", &envelopes).unwrap();
        assert_eq!(found.key, "c");
    }

    #[test]
    fn no_match_is_none() {
        let envelopes = vec![envelope("a", "Distrato Pedro Costa", "2024-01-01T00:00:00Z")];
        assert!(find_distrato_envelope("Maria Souza", &envelopes).is_none());
    }
}
