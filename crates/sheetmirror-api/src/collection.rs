//! Known collections and their schemas.
//!
//! Each collection is backed by one sheet. The schema is the write-side
//! contract: which columns a caller may set, which are required, how names
//! are normalised and where uniqueness is enforced. Reads keep every column
//! the sheet returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// A column a caller may write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: &'static str,
    pub required: bool,
}

const fn required(name: &'static str) -> FieldSchema {
    FieldSchema {
        name,
        required: true,
    }
}

const fn optional(name: &'static str) -> FieldSchema {
    FieldSchema {
        name,
        required: false,
    }
}

/// Case-insensitive uniqueness of a name column, optionally within the
/// records sharing the same value in `scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueName {
    pub field: &'static str,
    pub scope: Option<&'static str>,
}

/// Write-side schema of one collection
#[derive(Debug, Clone, Copy)]
pub struct CollectionSchema {
    /// Stable key used for snapshots and config
    pub key: &'static str,
    pub sheet_name: &'static str,
    pub id_field: &'static str,
    pub fields: &'static [FieldSchema],
    pub unique_name: Option<UniqueName>,
    /// Columns stored upper-cased after trimming
    pub uppercase_fields: &'static [&'static str],
    /// Local-only stamp set on optimistic creates
    pub created_at_field: Option<&'static str>,
    /// Local-only stamp set on optimistic creates and updates
    pub updated_at_field: Option<&'static str>,
    /// Whether the collection is mirrored into the snapshot store
    pub snapshotted: bool,
    pub writable: bool,
}

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn is_uppercase(&self, name: &str) -> bool {
        self.uppercase_fields.contains(&name)
    }
}

static CLIENTS: CollectionSchema = CollectionSchema {
    key: "clients",
    sheet_name: "Clientes",
    id_field: "ID_Cliente",
    fields: &[
        required("Nombre_Cliente"),
        optional("Fecha_Inicio"),
        optional("Estado"),
        optional("Notas"),
    ],
    unique_name: Some(UniqueName {
        field: "Nombre_Cliente",
        scope: None,
    }),
    uppercase_fields: &["Nombre_Cliente"],
    created_at_field: Some("Fecha_Creacion"),
    updated_at_field: Some("Ultima_Actualizacion"),
    snapshotted: true,
    writable: true,
};

static BRANDS: CollectionSchema = CollectionSchema {
    key: "brands",
    sheet_name: "Marcas",
    id_field: "ID_Marca",
    fields: &[
        required("ID_Cliente"),
        optional("Nombre_Cliente"),
        required("Nombre_Marca"),
        optional("Estado"),
        optional("Notas"),
    ],
    unique_name: Some(UniqueName {
        field: "Nombre_Marca",
        scope: Some("ID_Cliente"),
    }),
    uppercase_fields: &["Nombre_Marca"],
    created_at_field: Some("Fecha_Creacion"),
    updated_at_field: None,
    snapshotted: true,
    writable: true,
};

static DELIVERABLES: CollectionSchema = CollectionSchema {
    key: "deliverables",
    sheet_name: "Entregables",
    id_field: "ID_Entregable",
    fields: &[
        required("ID_Cliente"),
        required("ID_Marca"),
        required("Nombre_Entregable"),
        optional("Tipo_Entregable"),
        optional("url_entregable"),
        optional("Frecuencia_Validacion"),
        optional("Dia_Validacion"),
        optional("URLs_Fuentes"),
        optional("Automatizado"),
        optional("Proceso_Automatizacion"),
        optional("Instrucciones_Tecnicas"),
        optional("Notas_Troubleshooting"),
        optional("Estado"),
    ],
    unique_name: Some(UniqueName {
        field: "Nombre_Entregable",
        scope: Some("ID_Marca"),
    }),
    uppercase_fields: &[],
    created_at_field: Some("Fecha_Creacion"),
    updated_at_field: Some("Ultima_Actualizacion"),
    snapshotted: true,
    writable: true,
};

static VALIDATIONS: CollectionSchema = CollectionSchema {
    key: "validations",
    sheet_name: "Validaciones",
    id_field: "ID_Validacion",
    fields: &[],
    unique_name: None,
    uppercase_fields: &[],
    created_at_field: None,
    updated_at_field: None,
    snapshotted: false,
    writable: false,
};

static DELIVERABLE_TYPES: CollectionSchema = CollectionSchema {
    key: "deliverable_types",
    sheet_name: "Tipos_Entregable",
    id_field: "ID_Tipo",
    fields: &[
        required("Nombre_Tipo"),
        optional("Descripcion"),
        optional("Estado"),
    ],
    unique_name: None,
    uppercase_fields: &[],
    created_at_field: Some("Fecha_Creacion"),
    updated_at_field: Some("Ultima_Actualizacion"),
    snapshotted: false,
    writable: true,
};

static TOOLS: CollectionSchema = CollectionSchema {
    key: "tools",
    sheet_name: "Herramientas_Catalogo",
    id_field: "ID_Herramienta",
    fields: &[
        required("Nombre_Herramienta"),
        optional("Categoria"),
        optional("URL_Oficial"),
        optional("Descripcion"),
        optional("Estado"),
    ],
    unique_name: None,
    uppercase_fields: &[],
    created_at_field: Some("Fecha_Creacion"),
    updated_at_field: Some("Ultima_Actualizacion"),
    snapshotted: false,
    writable: true,
};

static TOOL_CATEGORIES: CollectionSchema = CollectionSchema {
    key: "tool_categories",
    sheet_name: "Categorias_Herramientas",
    id_field: "ID_Categoria",
    fields: &[
        required("Nombre_Categoria"),
        optional("Descripcion"),
        optional("Icono"),
        optional("Estado"),
    ],
    unique_name: None,
    uppercase_fields: &["Nombre_Categoria"],
    created_at_field: Some("Fecha_Creacion"),
    updated_at_field: Some("Ultima_Actualizacion"),
    snapshotted: false,
    writable: true,
};

static USERS: CollectionSchema = CollectionSchema {
    key: "users",
    sheet_name: "Users",
    id_field: "ID_User",
    fields: &[
        required("Nombre_Usuario"),
        optional("Email"),
        optional("Rol"),
        optional("Estado"),
    ],
    unique_name: None,
    uppercase_fields: &[],
    created_at_field: Some("Fecha_Creacion"),
    updated_at_field: None,
    snapshotted: false,
    writable: true,
};

static ALERTS: CollectionSchema = CollectionSchema {
    key: "alerts",
    sheet_name: "Alertas",
    id_field: "ID_Alerta",
    fields: &[
        optional("Cliente"),
        optional("Proyecto"),
        optional("Tipo_Alerta"),
        optional("Mensaje"),
        optional("Estado"),
        optional("Fecha_Resolucion"),
    ],
    unique_name: None,
    uppercase_fields: &[],
    created_at_field: None,
    updated_at_field: None,
    snapshotted: false,
    writable: true,
};

/// Entity collections mirrored from the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Clients,
    Brands,
    Deliverables,
    Validations,
    DeliverableTypes,
    Tools,
    ToolCategories,
    Users,
    Alerts,
}

impl Collection {
    pub const ALL: [Collection; 9] = [
        Collection::Clients,
        Collection::Brands,
        Collection::Deliverables,
        Collection::Validations,
        Collection::DeliverableTypes,
        Collection::Tools,
        Collection::ToolCategories,
        Collection::Users,
        Collection::Alerts,
    ];

    pub fn schema(&self) -> &'static CollectionSchema {
        match self {
            Collection::Clients => &CLIENTS,
            Collection::Brands => &BRANDS,
            Collection::Deliverables => &DELIVERABLES,
            Collection::Validations => &VALIDATIONS,
            Collection::DeliverableTypes => &DELIVERABLE_TYPES,
            Collection::Tools => &TOOLS,
            Collection::ToolCategories => &TOOL_CATEGORIES,
            Collection::Users => &USERS,
            Collection::Alerts => &ALERTS,
        }
    }

    pub fn key(&self) -> &'static str {
        self.schema().key
    }

    pub fn sheet_name(&self) -> &'static str {
        self.schema().sheet_name
    }

    pub fn id_field(&self) -> &'static str {
        self.schema().id_field
    }

    pub fn from_sheet_name(sheet_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.sheet_name() == sheet_name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Collection {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.key() == s || c.sheet_name() == s)
            .ok_or_else(|| SyncError::validation(format!("Unknown collection '{}'", s)))
    }
}

/// Lifecycle of one collection inside the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionState {
    /// Never fetched
    Loading,
    /// Fetched, no local writes in flight
    Populated,
    /// Fetched, with local writes still awaiting the remote store
    StalePendingWrites,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_sheet_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(collection.key().parse::<Collection>().ok(), Some(collection));
            assert_eq!(
                Collection::from_sheet_name(collection.sheet_name()),
                Some(collection)
            );
        }
        assert!("nope".parse::<Collection>().is_err());
    }

    #[test]
    fn brand_names_are_unique_per_client() {
        let schema = Collection::Brands.schema();
        let rule = schema.unique_name.expect("brands enforce unique names");
        assert_eq!(rule.scope, Some("ID_Cliente"));
        assert!(schema.is_uppercase("Nombre_Marca"));
    }

    #[test]
    fn only_core_collections_are_snapshotted() {
        let snapshotted: Vec<_> = Collection::ALL
            .into_iter()
            .filter(|c| c.schema().snapshotted)
            .collect();
        assert_eq!(
            snapshotted,
            vec![
                Collection::Clients,
                Collection::Brands,
                Collection::Deliverables
            ]
        );
    }
}
