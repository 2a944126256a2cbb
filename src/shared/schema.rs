diesel::table! {
    contacts (id) {
        id -> Uuid,
        full_name -> Text,
        email -> Nullable<Text>,
        phone -> Nullable<Text>,
        registry_code -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    contracts (id) {
        id -> Uuid,
        contact_id -> Uuid,
        product_id -> Nullable<Uuid>,
        owner_id -> Nullable<Uuid>,
        status -> Text,
        vindi_customer_id -> Nullable<Text>,
        vindi_subscription_id -> Nullable<Text>,
        vindi_bill_id -> Nullable<Text>,
        clicksign_document_key -> Nullable<Text>,
        billing_status -> Text,
        signature_status -> Text,
        paid_installments -> Nullable<Int4>,
        total_installments -> Nullable<Int4>,
        last_payment_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    contract_cancellations (id) {
        id -> Uuid,
        contract_id -> Uuid,
        cancelled_at -> Nullable<Timestamptz>,
        reason -> Text,
        details -> Nullable<Text>,
        contract_month -> Nullable<Int4>,
        meetings_completed -> Nullable<Int4>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        user_id -> Uuid,
        title -> Text,
        message -> Text,
        notification_type -> Text,
        link -> Nullable<Text>,
        read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(contracts -> contacts (contact_id));
diesel::joinable!(contract_cancellations -> contracts (contract_id));

diesel::allow_tables_to_appear_in_same_query!(
    contacts,
    contracts,
    contract_cancellations,
    notifications,
);
