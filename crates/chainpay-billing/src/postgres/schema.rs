// Mirrors migrations/0001_billing.sql

diesel::table! {
    merchants (id) {
        id -> Uuid,
        wallet -> Text,
        api_key -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    plans (id) {
        id -> Uuid,
        merchant_id -> Uuid,
        name -> Text,
        amount -> Text,
        billing_interval -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        merchant_id -> Uuid,
        payer -> Text,
        amount -> Text,
        tx_hash -> Text,
        event_timestamp -> Int8,
        status -> Text,
        invoice_sent -> Bool,
        invoice_text -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    subscriptions (id) {
        id -> Uuid,
        merchant_id -> Uuid,
        plan_id -> Uuid,
        payer_wallet -> Text,
        status -> Text,
        current_period_end -> Int8,
        last_payment_tx -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    webhook_endpoints (id) {
        id -> Uuid,
        merchant_id -> Uuid,
        url -> Text,
        secret -> Text,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(plans -> merchants (merchant_id));
diesel::joinable!(payments -> merchants (merchant_id));
diesel::joinable!(subscriptions -> merchants (merchant_id));
diesel::joinable!(webhook_endpoints -> merchants (merchant_id));

diesel::allow_tables_to_appear_in_same_query!(
    merchants,
    plans,
    payments,
    subscriptions,
    webhook_endpoints,
);
