/// SQL DDL for the tracker database.
/// WAL mode + foreign keys enabled at connection time.
///
/// The hierarchy, AO and token tables belong to external directories; the
/// tracker reads them and writes only the location/presence columns of
/// `entities` and the append-only `violation_events` table.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS units (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS companies (
    id TEXT PRIMARY KEY,
    unit_id TEXT NOT NULL REFERENCES units(id),
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teams (
    id TEXT PRIMARY KEY,
    company_id TEXT NOT NULL REFERENCES companies(id),
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS squads (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL REFERENCES teams(id),
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    role TEXT NOT NULL DEFAULT 'normal',
    hierarchy_role TEXT,
    unit_id TEXT,
    company_id TEXT,
    team_id TEXT,
    squad_id TEXT,
    location TEXT,
    lng REAL,
    lat REAL,
    location_updated_at TEXT,
    online INTEGER NOT NULL DEFAULT 0,
    last_seen TEXT
);

CREATE TABLE IF NOT EXISTS auth_tokens (
    token TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL REFERENCES entities(id)
);

CREATE TABLE IF NOT EXISTS aos (
    id TEXT PRIMARY KEY,
    company_id TEXT NOT NULL,
    name TEXT NOT NULL,
    color TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    polygon TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS violation_events (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    unit_id TEXT,
    company_id TEXT,
    team_id TEXT,
    squad_id TEXT,
    ao_id TEXT,
    lng REAL NOT NULL,
    lat REAL NOT NULL,
    distance_meters REAL,
    breach_since TEXT,
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_companies_unit ON companies(unit_id);
CREATE INDEX IF NOT EXISTS idx_teams_company ON teams(company_id);
CREATE INDEX IF NOT EXISTS idx_squads_team ON squads(team_id);
CREATE INDEX IF NOT EXISTS idx_entities_company ON entities(company_id);
CREATE INDEX IF NOT EXISTS idx_entities_position ON entities(lat, lng);
CREATE INDEX IF NOT EXISTS idx_aos_company ON aos(company_id, active);
CREATE INDEX IF NOT EXISTS idx_violations_entity ON violation_events(entity_id, occurred_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
